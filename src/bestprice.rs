//! Forward search for the next hour meeting a price-level target
//!
//! Scans strictly after a reference timestamp through the remaining hours
//! of the series. The first hour whose level is target-or-cheaper wins; if
//! no hour qualifies, the single cheapest future hour is returned as a
//! fallback (earliest on price ties). An exhausted series yields `None`,
//! which the coordinator reports as Unknown.

use crate::error::{Result, TarifaError};
use crate::levels::{BetterPriceTarget, PriceLevel};
use crate::series::{HourlyPrice, PriceSeries};
use chrono::{DateTime, Utc};

/// Outcome of a successful forward search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestPrice {
    /// Start of the winning hour
    pub ts: DateTime<Utc>,
    /// Price of the winning hour in EUR/kWh
    pub price: f64,
    /// Level of the winning hour within its own day
    pub level: PriceLevel,
    /// True when no hour met the target and this is the cheapest future hour
    pub fallback: bool,
}

/// Find the next hour at or below the target level, strictly after `from_ts`.
///
/// Returns `Ok(None)` when the series holds no hour after `from_ts` at all.
/// A `from_ts` before the first covered hour is an input-contract violation.
pub fn find_next(
    series: &PriceSeries,
    from_ts: DateTime<Utc>,
    target: BetterPriceTarget,
) -> Result<Option<BestPrice>> {
    ensure_in_range(series, from_ts)?;

    let mut cheapest: Option<(&HourlyPrice, PriceLevel)> = None;
    for entry in series.entries_after(from_ts) {
        let Some(stats) = series.stats_for_ts(entry.ts) else {
            continue;
        };
        let level = stats.level(entry.price);
        if target.accepts(level) {
            return Ok(Some(BestPrice {
                ts: entry.ts,
                price: entry.price,
                level,
                fallback: false,
            }));
        }
        // Chronological scan, so a strict comparison keeps the earliest
        // hour among equal fallback prices.
        let improves = cheapest.is_none_or(|(best, _)| entry.price < best.price);
        if improves {
            cheapest = Some((entry, level));
        }
    }

    Ok(cheapest.map(|(entry, level)| BestPrice {
        ts: entry.ts,
        price: entry.price,
        level,
        fallback: true,
    }))
}

/// Count of hours strictly after `from_ts` whose level meets the target.
///
/// Zero is a concrete answer, not an absence of data.
pub fn better_prices_ahead(
    series: &PriceSeries,
    from_ts: DateTime<Utc>,
    target: BetterPriceTarget,
) -> Result<usize> {
    ensure_in_range(series, from_ts)?;

    let count = series
        .entries_after(from_ts)
        .filter(|entry| {
            series
                .stats_for_ts(entry.ts)
                .is_some_and(|stats| target.accepts(stats.level(entry.price)))
        })
        .count();
    Ok(count)
}

fn ensure_in_range(series: &PriceSeries, from_ts: DateTime<Utc>) -> Result<()> {
    let start = series
        .first_ts()
        .ok_or_else(|| TarifaError::price_data("price series has no entries"))?;
    if from_ts < start {
        return Err(TarifaError::validation(
            "from_ts",
            format!("{from_ts} precedes the series start {start}"),
        ));
    }
    Ok(())
}
