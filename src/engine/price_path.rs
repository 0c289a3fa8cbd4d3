//! Best and worst excursions over a lot's holding period.

use crate::datasource::PricePoint;
use crate::domain::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePathMetrics {
    pub max_price: Decimal,
    pub min_price: Decimal,
    /// `(max - entry) / entry * 100`; None when the entry price is zero.
    pub max_profit_percent: Option<Decimal>,
    /// `(entry - min) / entry * 100`; None when the entry price is zero.
    pub max_drawdown_percent: Option<Decimal>,
    /// None when the entry sample itself is the maximum.
    pub time_to_max_profit_minutes: Option<i64>,
}

/// Compute path metrics with `entry` and `exit` as boundary samples.
///
/// Samples outside `[entry.time, exit.time]` or with a negative price are ignored;
/// the rest are visited in time order, ties keeping provider order.
pub fn price_path_metrics(entry: PricePoint, exit: PricePoint, samples: &[PricePoint]) -> PricePathMetrics {
    let mut inner: Vec<PricePoint> = samples
        .iter()
        .filter(|p| p.time >= entry.time && p.time <= exit.time && !p.price.is_negative())
        .cloned()
        .collect();
    inner.sort_by_key(|p| p.time);

    let path = std::iter::once(&entry).chain(inner.iter()).chain(std::iter::once(&exit));

    let mut max_point = &entry;
    let mut max_index = 0usize;
    let mut min_price = entry.price;
    for (index, point) in path.enumerate() {
        if point.price > max_point.price {
            max_point = point;
            max_index = index;
        }
        min_price = min_price.min(point.price);
    }

    let time_to_max_profit_minutes = if max_index == 0 {
        None
    } else {
        Some(entry.time.minutes_until(max_point.time))
    };

    PricePathMetrics {
        max_price: max_point.price,
        min_price,
        max_profit_percent: (max_point.price - entry.price).percent_of(entry.price),
        max_drawdown_percent: (entry.price - min_price).percent_of(entry.price),
        time_to_max_profit_minutes,
    }
}
