//! Derived-value computation against one published snapshot
//!
//! Every answer is a three-way outcome: a concrete value, `Unknown` when
//! the computation ran but found no qualifying result, or `Unavailable`
//! when there is no underlying data at all. Calendar-only values (tariff
//! periods, available power) never go unavailable.

use super::{CoordinatorSnapshot, DerivedValue, SensorKind, SensorValue};
use crate::bestprice;
use crate::esios::Indicator;
use crate::periods::{self, PowerPeriod, PricePeriod};
use crate::series::PriceSeries;
use chrono::{DateTime, Duration, Timelike, Utc};

impl CoordinatorSnapshot {
    /// Answer one sensor kind as of `now`
    pub fn derived_value(&self, kind: SensorKind, now: DateTime<Utc>) -> DerivedValue {
        match kind {
            SensorKind::CurrentPrice => {
                self.series_value(|s| s.price_at(now).map(SensorValue::Price))
            }
            SensorKind::NextPrice => self.series_value(|s| {
                s.entries_after(now)
                    .next()
                    .map(|entry| SensorValue::Price(entry.price))
            }),
            SensorKind::NextPriceLevel => self.series_value(|s| {
                let entry = s.entries_after(now).next()?;
                let stats = s.stats_for_ts(entry.ts)?;
                Some(SensorValue::Level(stats.level(entry.price)))
            }),
            SensorKind::NextPriceIn => self.series_value(|s| {
                s.entries_after(now)
                    .next()
                    .map(|entry| SensorValue::Remaining(format_remaining(entry.ts - now)))
            }),
            SensorKind::MinPrice => {
                self.day_stats_value(now, |stats| SensorValue::Price(stats.min_price))
            }
            SensorKind::MaxPrice => {
                self.day_stats_value(now, |stats| SensorValue::Price(stats.max_price))
            }
            SensorKind::MinPriceAt => {
                self.day_stats_value(now, |stats| SensorValue::Timestamp(stats.min_price_at))
            }
            SensorKind::MaxPriceAt => {
                self.day_stats_value(now, |stats| SensorValue::Timestamp(stats.max_price_at))
            }
            SensorKind::PriceRatio => self.series_value(|s| {
                let price = s.price_at(now)?;
                let stats = s.stats_for_ts(now)?;
                Some(SensorValue::Ratio(round_ratio(stats.ratio(price))))
            }),
            SensorKind::PricePosition => {
                self.series_value(|s| s.price_position(now).map(SensorValue::Position))
            }
            SensorKind::CurrentPriceLevel => {
                self.series_value(|s| s.level_at(now).map(SensorValue::Level))
            }
            SensorKind::CurrentPeriod => {
                let local = now.with_timezone(&self.tz);
                let holiday = self.holidays.is_holiday(local.date_naive());
                let (period, _) = periods::classify(&local, self.zone, holiday);
                DerivedValue::Value(SensorValue::Period(period))
            }
            SensorKind::NextPeriod => match self.period_change(now) {
                Some((next, _)) => DerivedValue::Value(SensorValue::Period(next)),
                None => DerivedValue::Unknown,
            },
            SensorKind::NextPeriodIn => match self.period_change(now) {
                Some((_, until)) => {
                    DerivedValue::Value(SensorValue::Remaining(format_remaining(until)))
                }
                None => DerivedValue::Unknown,
            },
            SensorKind::AvailablePower => {
                let local = now.with_timezone(&self.tz);
                let holiday = self.holidays.is_holiday(local.date_naive());
                let (_, power) = periods::classify(&local, self.zone, holiday);
                let kw = match power {
                    PowerPeriod::P1 => self.power_p1_kw,
                    PowerPeriod::P3 => self.power_p3_kw,
                };
                DerivedValue::Value(SensorValue::Power(kw * 1000.0))
            }
            SensorKind::NextBetterPrice => self.series_value(|s| {
                let best = bestprice::find_next(s, now, self.target).ok().flatten()?;
                Some(SensorValue::Price(best.price))
            }),
            SensorKind::NextBetterPriceLevel => self.series_value(|s| {
                let best = bestprice::find_next(s, now, self.target).ok().flatten()?;
                Some(SensorValue::Level(best.level))
            }),
            SensorKind::NextBetterPriceAt => self.series_value(|s| {
                let best = bestprice::find_next(s, now, self.target).ok().flatten()?;
                Some(SensorValue::Timestamp(best.ts))
            }),
            SensorKind::NextBetterPriceIn => self.series_value(|s| {
                let best = bestprice::find_next(s, now, self.target).ok().flatten()?;
                Some(SensorValue::Remaining(format_remaining(best.ts - now)))
            }),
            SensorKind::BetterPricesAhead => self.series_value(|s| {
                bestprice::better_prices_ahead(s, now, self.target)
                    .ok()
                    .map(SensorValue::Count)
            }),
        }
    }

    /// Current price of one indicator series, honoring its availability flag
    pub fn indicator_price(&self, indicator: Indicator, now: DateTime<Utc>) -> DerivedValue {
        if indicator == Indicator::Pvpc {
            return self.derived_value(SensorKind::CurrentPrice, now);
        }
        if !self.availability.get(&indicator).copied().unwrap_or(false) {
            return DerivedValue::Unavailable;
        }
        match self.aux.get(&indicator) {
            None => DerivedValue::Unavailable,
            Some(series) => match series.price_at(now) {
                Some(price) => DerivedValue::Value(SensorValue::Price(price)),
                None => DerivedValue::Unknown,
            },
        }
    }

    fn series_value(&self, f: impl FnOnce(&PriceSeries) -> Option<SensorValue>) -> DerivedValue {
        match &self.series {
            None => DerivedValue::Unavailable,
            Some(series) => match f(series) {
                Some(value) => DerivedValue::Value(value),
                None => DerivedValue::Unknown,
            },
        }
    }

    fn day_stats_value(
        &self,
        now: DateTime<Utc>,
        f: impl FnOnce(&crate::series::DayStats) -> SensorValue,
    ) -> DerivedValue {
        let today = now.with_timezone(&self.tz).date_naive();
        self.series_value(|s| s.day_stats(today).map(f))
    }

    fn period_change(&self, now: DateTime<Utc>) -> Option<(PricePeriod, Duration)> {
        let local = now.with_timezone(&self.tz);
        // The scan steps in whole hours from the start of the current hour;
        // the countdown then subtracts the part of the hour already elapsed.
        let into_hour = Duration::minutes(i64::from(local.minute()))
            + Duration::seconds(i64::from(local.second()))
            + Duration::nanoseconds(i64::from(local.nanosecond()));
        let hour_start = (now - into_hour).with_timezone(&self.tz);
        let (current, next, delta) =
            periods::current_and_next_periods(&hour_start, self.zone, |day| {
                self.holidays.is_holiday(day)
            });
        // A capped scan reports the current period again; that is no answer.
        (next != current).then_some((next, delta - into_hour))
    }
}

/// Zero-padded HH:MM remaining time, clamped at 00:00
pub(crate) fn format_remaining(delta: Duration) -> String {
    let total = delta.num_minutes().max(0);
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn round_ratio(ratio: f64) -> f64 {
    (ratio * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorState;
    use crate::esios::DataSource;
    use crate::holidays::HolidayCache;
    use crate::levels::{BetterPriceTarget, PriceLevel};
    use crate::series::HourlyPrice;
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;
    use std::collections::BTreeMap;

    fn snapshot_with(series: Option<PriceSeries>) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            timestamp: Utc::now(),
            state: CoordinatorState::Running,
            zone: crate::periods::TariffZone::Peninsula,
            tz: Madrid,
            target: BetterPriceTarget::Neutral,
            power_p1_kw: 5.75,
            power_p3_kw: 3.3,
            source: DataSource::Public,
            series,
            aux: BTreeMap::new(),
            availability: BTreeMap::new(),
            holidays: HolidayCache::default(),
            last_refresh: None,
            total_refreshes: 0,
            failed_refreshes: 0,
        }
    }

    // Monday 2025-06-02 in Madrid, CEST, so local hour h starts at h-2 UTC.
    fn monday_series(prices: &[f64]) -> PriceSeries {
        assert_eq!(prices.len(), 24);
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap();
        let entries = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| HourlyPrice::new(start + Duration::hours(i as i64), p))
            .collect();
        PriceSeries::new(entries, Madrid).unwrap()
    }

    fn local(hour: u32, minute: u32) -> DateTime<Utc> {
        Madrid
            .with_ymd_and_hms(2025, 6, 2, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn price_values_unavailable_without_series() {
        let snap = snapshot_with(None);
        let now = local(12, 0);
        assert_eq!(
            snap.derived_value(SensorKind::CurrentPrice, now),
            DerivedValue::Unavailable
        );
        assert_eq!(
            snap.derived_value(SensorKind::NextBetterPrice, now),
            DerivedValue::Unavailable
        );
        assert_eq!(
            snap.derived_value(SensorKind::BetterPricesAhead, now),
            DerivedValue::Unavailable
        );
    }

    #[test]
    fn calendar_values_stay_total_without_series() {
        let snap = snapshot_with(None);
        // Monday noon is peak price period and P1 power in the Peninsula.
        let value = snap.derived_value(SensorKind::CurrentPeriod, local(12, 0));
        assert_eq!(
            value,
            DerivedValue::Value(SensorValue::Period(PricePeriod::P1))
        );
        let power = snap.derived_value(SensorKind::AvailablePower, local(12, 0));
        assert_eq!(power, DerivedValue::Value(SensorValue::Power(5750.0)));
        let valley = snap.derived_value(SensorKind::AvailablePower, local(6, 0));
        assert_eq!(valley, DerivedValue::Value(SensorValue::Power(3.3 * 1000.0)));
    }

    #[test]
    fn current_price_unknown_outside_coverage() {
        let snap = snapshot_with(Some(monday_series(&[0.2; 24])));
        let tuesday = Madrid
            .with_ymd_and_hms(2025, 6, 3, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            snap.derived_value(SensorKind::CurrentPrice, tuesday),
            DerivedValue::Unknown
        );
    }

    #[test]
    fn day_extremes_and_ratio() {
        let mut prices = [0.20; 24];
        prices[4] = 0.10;
        prices[20] = 0.30;
        let snap = snapshot_with(Some(monday_series(&prices)));
        let now = local(12, 30);

        assert_eq!(
            snap.derived_value(SensorKind::MinPrice, now),
            DerivedValue::Value(SensorValue::Price(0.10))
        );
        assert_eq!(
            snap.derived_value(SensorKind::MaxPriceAt, now),
            DerivedValue::Value(SensorValue::Timestamp(local(20, 0)))
        );
        // (0.20 - 0.10) / (0.30 - 0.10) = 0.5
        assert_eq!(
            snap.derived_value(SensorKind::PriceRatio, now),
            DerivedValue::Value(SensorValue::Ratio(0.5))
        );
        assert_eq!(
            snap.derived_value(SensorKind::CurrentPriceLevel, now),
            DerivedValue::Value(SensorValue::Level(PriceLevel::Neutral))
        );
    }

    #[test]
    fn next_better_price_unknown_at_end_of_day() {
        let mut prices = [0.30; 24];
        prices[3] = 0.10;
        let snap = snapshot_with(Some(monday_series(&prices)));
        // After the last hour started there is nothing ahead at all.
        assert_eq!(
            snap.derived_value(SensorKind::NextBetterPrice, local(23, 30)),
            DerivedValue::Unknown
        );
    }

    #[test]
    fn next_price_in_counts_down_to_the_hour() {
        let snap = snapshot_with(Some(monday_series(&[0.2; 24])));
        let value = snap.derived_value(SensorKind::NextPriceIn, local(13, 25));
        assert_eq!(
            value,
            DerivedValue::Value(SensorValue::Remaining("00:35".to_string()))
        );
    }

    #[test]
    fn next_period_on_monday_noon_is_p2_at_14() {
        let snap = snapshot_with(None);
        assert_eq!(
            snap.derived_value(SensorKind::NextPeriod, local(12, 0)),
            DerivedValue::Value(SensorValue::Period(PricePeriod::P2))
        );
        assert_eq!(
            snap.derived_value(SensorKind::NextPeriodIn, local(12, 0)),
            DerivedValue::Value(SensorValue::Remaining("02:00".to_string()))
        );
    }

    #[test]
    fn next_period_countdown_subtracts_elapsed_minutes() {
        let snap = snapshot_with(None);
        // Mid-hour at 12:30 the 14:00 boundary is 90 minutes out, not two
        // whole scan hours.
        assert_eq!(
            snap.derived_value(SensorKind::NextPeriodIn, local(12, 30)),
            DerivedValue::Value(SensorValue::Remaining("01:30".to_string()))
        );
        assert_eq!(
            snap.derived_value(SensorKind::NextPeriod, local(12, 30)),
            DerivedValue::Value(SensorValue::Period(PricePeriod::P2))
        );
    }

    #[test]
    fn remaining_clamps_and_pads() {
        assert_eq!(format_remaining(Duration::minutes(95)), "01:35");
        assert_eq!(format_remaining(Duration::minutes(0)), "00:00");
        assert_eq!(format_remaining(Duration::minutes(-10)), "00:00");
        assert_eq!(format_remaining(Duration::hours(26)), "26:00");
    }

    #[test]
    fn indicator_price_honors_availability() {
        let mut snap = snapshot_with(Some(monday_series(&[0.2; 24])));
        snap.aux
            .insert(Indicator::Injection, monday_series(&[0.05; 24]));
        snap.availability.insert(Indicator::Injection, true);
        snap.availability.insert(Indicator::Mag, false);

        let now = local(10, 0);
        assert_eq!(
            snap.indicator_price(Indicator::Injection, now),
            DerivedValue::Value(SensorValue::Price(0.05))
        );
        assert_eq!(
            snap.indicator_price(Indicator::Mag, now),
            DerivedValue::Unavailable
        );
    }
}
