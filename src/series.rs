//! Hourly price series model
//!
//! A `PriceSeries` holds one or two contiguous local days of hourly prices
//! ("today", plus "tomorrow" once the upstream publishes it). Entries are
//! validated on construction: strictly increasing, hour-aligned, and every
//! covered local day complete. Day completeness is DST-aware, so the clock
//! change days with 23 or 25 wall-clock hours are accepted.
//!
//! Per-day extremes are derived lazily and cached; the series itself is
//! immutable after construction, which is what makes the coordinator's
//! atomic snapshot swap safe.

use crate::error::{Result, TarifaError};
use crate::levels::{self, PriceLevel};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One hour of the price curve, in EUR/kWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyPrice {
    /// Start of the hour this price applies to
    pub ts: DateTime<Utc>,

    /// Price in EUR/kWh
    pub price: f64,
}

impl HourlyPrice {
    pub fn new(ts: DateTime<Utc>, price: f64) -> Self {
        Self { ts, price }
    }
}

/// Extremes of one covered local day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayStats {
    pub min_price: f64,
    pub max_price: f64,
    /// Earliest hour carrying the minimum price
    pub min_price_at: DateTime<Utc>,
    /// Earliest hour carrying the maximum price
    pub max_price_at: DateTime<Utc>,
    pub hours: usize,
}

impl DayStats {
    /// Position of `price` within this day's range, `0.0..=1.0`
    pub fn ratio(&self, price: f64) -> f64 {
        levels::price_ratio(price, self.min_price, self.max_price)
    }

    /// Relative level of `price` within this day's range
    pub fn level(&self, price: f64) -> PriceLevel {
        PriceLevel::classify(price, self.min_price, self.max_price)
    }
}

/// Validated, immutable hourly price series
#[derive(Debug, Clone)]
pub struct PriceSeries {
    prices: Vec<HourlyPrice>,
    tz: Tz,
    stats: OnceCell<BTreeMap<NaiveDate, DayStats>>,
}

impl PartialEq for PriceSeries {
    fn eq(&self, other: &Self) -> bool {
        // The lazily built stats cache is derived data and does not
        // participate in equality.
        self.prices == other.prices && self.tz == other.tz
    }
}

impl PriceSeries {
    /// Build a series from raw hourly prices, validating coverage.
    ///
    /// Rejects empty input, misaligned or non-contiguous timestamps, more
    /// than two covered days, and days with missing hours.
    pub fn new(prices: Vec<HourlyPrice>, tz: Tz) -> Result<Self> {
        Self::validate(&prices, tz)?;
        Ok(Self {
            prices,
            tz,
            stats: OnceCell::new(),
        })
    }

    fn validate(prices: &[HourlyPrice], tz: Tz) -> Result<()> {
        if prices.is_empty() {
            return Err(TarifaError::price_data("empty price series"));
        }

        for entry in prices {
            if entry.ts.minute() != 0 || entry.ts.second() != 0 || entry.ts.nanosecond() != 0 {
                return Err(TarifaError::price_data(format!(
                    "timestamp {} is not hour-aligned",
                    entry.ts
                )));
            }
            if !entry.price.is_finite() {
                return Err(TarifaError::price_data(format!(
                    "non-finite price at {}",
                    entry.ts
                )));
            }
        }

        for pair in prices.windows(2) {
            let gap = pair[1].ts - pair[0].ts;
            if gap != Duration::hours(1) {
                return Err(TarifaError::price_data(format!(
                    "expected consecutive hours, got {} then {}",
                    pair[0].ts, pair[1].ts
                )));
            }
        }

        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for entry in prices {
            let date = entry.ts.with_timezone(&tz).date_naive();
            *per_day.entry(date).or_insert(0) += 1;
        }

        if per_day.len() > 2 {
            return Err(TarifaError::price_data(format!(
                "series covers {} local days, expected at most two",
                per_day.len()
            )));
        }
        let dates: Vec<NaiveDate> = per_day.keys().copied().collect();
        if dates.len() == 2 && dates[1] != dates[0] + Duration::days(1) {
            return Err(TarifaError::price_data(format!(
                "covered days {} and {} are not consecutive",
                dates[0], dates[1]
            )));
        }

        for (date, count) in &per_day {
            let expected = hours_in_local_day(*date, tz);
            if *count as i64 != expected {
                return Err(TarifaError::price_data(format!(
                    "day {} has {} hours, expected {}",
                    date, count, expected
                )));
            }
        }

        Ok(())
    }

    pub fn prices(&self) -> &[HourlyPrice] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Start of the first covered hour
    pub fn first_ts(&self) -> Option<DateTime<Utc>> {
        self.prices.first().map(|p| p.ts)
    }

    /// Start of the last covered hour
    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.prices.last().map(|p| p.ts)
    }

    /// Local dates covered by this series, in order
    pub fn covered_dates(&self) -> Vec<NaiveDate> {
        self.day_stats_map().keys().copied().collect()
    }

    /// Whether the series already includes data past the given local date
    pub fn covers_beyond(&self, date: NaiveDate) -> bool {
        self.day_stats_map().keys().any(|d| *d > date)
    }

    /// Price of the hour containing `ts`, if covered
    pub fn price_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.prices
            .iter()
            .find(|p| p.ts <= ts && ts < p.ts + Duration::hours(1))
            .map(|p| p.price)
    }

    /// The entry for the hour containing `ts`, if covered
    pub fn entry_at(&self, ts: DateTime<Utc>) -> Option<&HourlyPrice> {
        self.prices
            .iter()
            .find(|p| p.ts <= ts && ts < p.ts + Duration::hours(1))
    }

    /// Entries strictly after the hour containing `ts`
    pub fn entries_after(&self, ts: DateTime<Utc>) -> impl Iterator<Item = &HourlyPrice> {
        self.prices.iter().filter(move |p| p.ts > ts)
    }

    /// Extremes of one covered local day
    pub fn day_stats(&self, date: NaiveDate) -> Option<&DayStats> {
        self.day_stats_map().get(&date)
    }

    /// Extremes of the local day containing `ts`
    pub fn stats_for_ts(&self, ts: DateTime<Utc>) -> Option<&DayStats> {
        let date = ts.with_timezone(&self.tz).date_naive();
        self.day_stats(date)
    }

    /// Relative level of the hour containing `ts`, against its own day
    pub fn level_at(&self, ts: DateTime<Utc>) -> Option<PriceLevel> {
        let price = self.price_at(ts)?;
        self.stats_for_ts(ts).map(|stats| stats.level(price))
    }

    /// 1-based rank of the hour's price within its local day (1 = cheapest)
    pub fn price_position(&self, ts: DateTime<Utc>) -> Option<usize> {
        let price = self.price_at(ts)?;
        let date = ts.with_timezone(&self.tz).date_naive();
        let rank = self
            .prices
            .iter()
            .filter(|p| p.ts.with_timezone(&self.tz).date_naive() == date)
            .filter(|p| p.price < price)
            .count();
        Some(rank + 1)
    }

    fn day_stats_map(&self) -> &BTreeMap<NaiveDate, DayStats> {
        self.stats.get_or_init(|| {
            let mut map: BTreeMap<NaiveDate, DayStats> = BTreeMap::new();
            for entry in &self.prices {
                let date = entry.ts.with_timezone(&self.tz).date_naive();
                map.entry(date)
                    .and_modify(|s| {
                        if entry.price < s.min_price {
                            s.min_price = entry.price;
                            s.min_price_at = entry.ts;
                        }
                        if entry.price > s.max_price {
                            s.max_price = entry.price;
                            s.max_price_at = entry.ts;
                        }
                        s.hours += 1;
                    })
                    .or_insert(DayStats {
                        min_price: entry.price,
                        max_price: entry.price,
                        min_price_at: entry.ts,
                        max_price_at: entry.ts,
                        hours: 1,
                    });
            }
            map
        })
    }
}

/// Wall-clock hours of a local day (23 or 25 across DST changes)
pub fn hours_in_local_day(date: NaiveDate, tz: Tz) -> i64 {
    let start = local_midnight_utc(date, tz);
    let end = local_midnight_utc(date + Duration::days(1), tz);
    (end - start).num_hours()
}

/// UTC instant of a local date's midnight.
///
/// Spanish DST transitions happen at 02:00/03:00, so midnight always exists;
/// the UTC fallback only guards against exotic zone data.
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Madrid;

    fn hour(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    fn full_day(date: NaiveDate, base_price: f64) -> Vec<HourlyPrice> {
        let start = local_midnight_utc(date, Madrid);
        let hours = hours_in_local_day(date, Madrid);
        (0..hours)
            .map(|h| HourlyPrice::new(start + Duration::hours(h), base_price + h as f64 * 0.001))
            .collect()
    }

    #[test]
    fn rejects_gap_in_coverage() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let mut prices = full_day(date, 0.1);
        prices.remove(13);
        assert!(PriceSeries::new(prices, Madrid).is_err());
    }

    #[test]
    fn rejects_misaligned_timestamp() {
        let ts = hour(2025, 6, 2, 10) + Duration::minutes(30);
        let prices = vec![HourlyPrice::new(ts, 0.1)];
        assert!(PriceSeries::new(prices, Madrid).is_err());
    }

    #[test]
    fn accepts_dst_short_and_long_days() {
        // Spring forward: 2025-03-30 has 23 local hours in Madrid
        let spring = NaiveDate::from_ymd_opt(2025, 3, 30).unwrap();
        assert_eq!(hours_in_local_day(spring, Madrid), 23);
        assert!(PriceSeries::new(full_day(spring, 0.1), Madrid).is_ok());

        // Fall back: 2025-10-26 has 25 local hours
        let fall = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        assert_eq!(hours_in_local_day(fall, Madrid), 25);
        assert!(PriceSeries::new(full_day(fall, 0.1), Madrid).is_ok());
    }

    #[test]
    fn two_day_series_with_stats_per_day() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let tomorrow = today + Duration::days(1);
        let mut prices = full_day(today, 0.10);
        prices.extend(full_day(tomorrow, 0.20));
        let series = PriceSeries::new(prices, Madrid).unwrap();

        assert_eq!(series.covered_dates(), vec![today, tomorrow]);
        let today_stats = series.day_stats(today).unwrap();
        let tomorrow_stats = series.day_stats(tomorrow).unwrap();
        assert!(today_stats.max_price < tomorrow_stats.min_price);
        assert_eq!(today_stats.hours, 24);
        // Tomorrow's hours classify against tomorrow's own range
        let tomorrow_ts = local_midnight_utc(tomorrow, Madrid);
        assert_eq!(series.level_at(tomorrow_ts), Some(PriceLevel::VeryCheap));
    }

    #[test]
    fn price_at_covers_the_whole_hour() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let series = PriceSeries::new(full_day(date, 0.1), Madrid).unwrap();
        let start = local_midnight_utc(date, Madrid);
        let mid_hour = start + Duration::minutes(59) + Duration::seconds(59);
        assert_eq!(series.price_at(mid_hour), series.price_at(start));
        assert!(series.price_at(start - Duration::seconds(1)).is_none());
    }

    #[test]
    fn price_position_ranks_within_day() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let series = PriceSeries::new(full_day(date, 0.1), Madrid).unwrap();
        let start = local_midnight_utc(date, Madrid);
        // Prices increase by hour, so hour 0 ranks first and hour 23 last
        assert_eq!(series.price_position(start), Some(1));
        assert_eq!(series.price_position(start + Duration::hours(23)), Some(24));
    }
}
