//! Tariff period classification for PVPC 2.0TD
//!
//! Billing periods depend on hour of day, weekday, and the national holiday
//! calendar. Saturdays, Sundays and holidays are "restricted days": the whole
//! day bills as P3 for both energy and power. On working days the hour is
//! looked up in a zone-specific table of half-open spans.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// Geographic zone selecting the period boundary table.
///
/// Baleares and Canarias share the Peninsula table; only Ceuta and Melilla
/// shift their peak hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TariffZone {
    #[default]
    Peninsula,
    CeutaMelilla,
}

impl TariffZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peninsula => "peninsula",
            Self::CeutaMelilla => "ceuta_melilla",
        }
    }

    fn price_spans(&self) -> &'static [HourSpan<PricePeriod>] {
        match self {
            Self::Peninsula => &PENINSULA_PRICE_SPANS,
            Self::CeutaMelilla => &CEUTA_MELILLA_PRICE_SPANS,
        }
    }

    fn power_spans(&self) -> &'static [HourSpan<PowerPeriod>] {
        // Power periods are identical in both zones
        &POWER_SPANS
    }
}

/// Energy billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricePeriod {
    P1,
    P2,
    P3,
}

impl PricePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

/// Contracted power billing period (no P2 analog)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerPeriod {
    P1,
    P3,
}

impl PowerPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P3 => "P3",
        }
    }
}

/// Half-open hour span `[start, end)` mapping to a period
struct HourSpan<P> {
    start: u32,
    end: u32,
    period: P,
}

impl<P: Copy> HourSpan<P> {
    const fn new(start: u32, end: u32, period: P) -> Self {
        Self { start, end, period }
    }

    fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }
}

const PENINSULA_PRICE_SPANS: [HourSpan<PricePeriod>; 6] = [
    HourSpan::new(0, 8, PricePeriod::P3),
    HourSpan::new(8, 10, PricePeriod::P2),
    HourSpan::new(10, 14, PricePeriod::P1),
    HourSpan::new(14, 18, PricePeriod::P2),
    HourSpan::new(18, 22, PricePeriod::P1),
    HourSpan::new(22, 24, PricePeriod::P2),
];

const CEUTA_MELILLA_PRICE_SPANS: [HourSpan<PricePeriod>; 6] = [
    HourSpan::new(0, 8, PricePeriod::P3),
    HourSpan::new(8, 11, PricePeriod::P2),
    HourSpan::new(11, 15, PricePeriod::P1),
    HourSpan::new(15, 19, PricePeriod::P2),
    HourSpan::new(19, 23, PricePeriod::P1),
    HourSpan::new(23, 24, PricePeriod::P2),
];

const POWER_SPANS: [HourSpan<PowerPeriod>; 2] = [
    HourSpan::new(0, 8, PowerPeriod::P3),
    HourSpan::new(8, 24, PowerPeriod::P1),
];

// The scan in current_and_next_periods terminates on the first working day;
// this bounds it against a pathological always-holiday predicate.
const MAX_SCAN_HOURS: i64 = 24 * 21;

fn span_lookup<P: Copy>(spans: &[HourSpan<P>], hour: u32, fallback: P) -> P {
    spans
        .iter()
        .find(|s| s.contains(hour))
        .map_or(fallback, |s| s.period)
}

/// Classify a local timestamp into its energy and power billing periods.
///
/// `is_holiday` is the pre-resolved holiday flag for the timestamp's local
/// date; callers without holiday data pass `false`.
pub fn classify<Tz: TimeZone>(
    ts: &DateTime<Tz>,
    zone: TariffZone,
    is_holiday: bool,
) -> (PricePeriod, PowerPeriod) {
    if is_restricted_day(ts.weekday(), is_holiday) {
        return (PricePeriod::P3, PowerPeriod::P3);
    }
    let hour = ts.hour();
    let price = span_lookup(zone.price_spans(), hour, PricePeriod::P3);
    let power = span_lookup(zone.power_spans(), hour, PowerPeriod::P3);
    (price, power)
}

/// Whether the day bills as P3 across all hours
pub fn is_restricted_day(weekday: Weekday, is_holiday: bool) -> bool {
    is_holiday || weekday == Weekday::Sat || weekday == Weekday::Sun
}

/// Current price period plus the next differing one and the time until it
/// starts, scanning forward hour by hour.
pub fn current_and_next_periods<Tz, F>(
    ts: &DateTime<Tz>,
    zone: TariffZone,
    is_holiday: F,
) -> (PricePeriod, PricePeriod, Duration)
where
    Tz: TimeZone,
    F: Fn(NaiveDate) -> bool,
{
    let current = classify(ts, zone, is_holiday(ts.date_naive())).0;
    let mut delta = Duration::hours(1);
    while delta.num_hours() <= MAX_SCAN_HOURS {
        let probe = ts.clone() + delta;
        let period = classify(&probe, zone, is_holiday(probe.date_naive())).0;
        if period != current {
            return (current, period, delta);
        }
        delta += Duration::hours(1);
    }
    (current, current, delta)
}
