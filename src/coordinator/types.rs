//! Coordinator state, commands, and snapshot types

use crate::config::FastCadence;
use crate::esios::{DataSource, Indicator};
use crate::holidays::HolidayCache;
use crate::levels::{BetterPriceTarget, PriceLevel};
use crate::periods::{PricePeriod, TariffZone};
use crate::series::PriceSeries;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Engine lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Initializing,
    Running,
    Error(String),
    ShuttingDown,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Error(msg) => write!(f, "error: {}", msg),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Commands accepted by the run loop from host layers
#[derive(Debug, Clone)]
pub enum CoordinatorCommand {
    SetBetterPriceTarget(BetterPriceTarget),
    SetFastCadence(FastCadence),
    RefreshNow,
}

/// Derived values the engine can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SensorKind {
    CurrentPrice,
    NextPrice,
    NextPriceLevel,
    NextPriceIn,
    MinPrice,
    MaxPrice,
    MinPriceAt,
    MaxPriceAt,
    PriceRatio,
    PricePosition,
    CurrentPriceLevel,
    CurrentPeriod,
    NextPeriod,
    NextPeriodIn,
    AvailablePower,
    NextBetterPrice,
    NextBetterPriceLevel,
    NextBetterPriceAt,
    NextBetterPriceIn,
    BetterPricesAhead,
}

impl SensorKind {
    pub fn all() -> &'static [SensorKind] {
        &[
            Self::CurrentPrice,
            Self::NextPrice,
            Self::NextPriceLevel,
            Self::NextPriceIn,
            Self::MinPrice,
            Self::MaxPrice,
            Self::MinPriceAt,
            Self::MaxPriceAt,
            Self::PriceRatio,
            Self::PricePosition,
            Self::CurrentPriceLevel,
            Self::CurrentPeriod,
            Self::NextPeriod,
            Self::NextPeriodIn,
            Self::AvailablePower,
            Self::NextBetterPrice,
            Self::NextBetterPriceLevel,
            Self::NextBetterPriceAt,
            Self::NextBetterPriceIn,
            Self::BetterPricesAhead,
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::CurrentPrice => "current_price",
            Self::NextPrice => "next_price",
            Self::NextPriceLevel => "next_price_level",
            Self::NextPriceIn => "next_price_in",
            Self::MinPrice => "min_price",
            Self::MaxPrice => "max_price",
            Self::MinPriceAt => "min_price_at",
            Self::MaxPriceAt => "max_price_at",
            Self::PriceRatio => "price_ratio",
            Self::PricePosition => "price_position",
            Self::CurrentPriceLevel => "current_price_level",
            Self::CurrentPeriod => "current_period",
            Self::NextPeriod => "next_period",
            Self::NextPeriodIn => "next_period_in",
            Self::AvailablePower => "available_power",
            Self::NextBetterPrice => "next_better_price",
            Self::NextBetterPriceLevel => "next_better_price_level",
            Self::NextBetterPriceAt => "next_better_price_at",
            Self::NextBetterPriceIn => "next_better_price_in",
            Self::BetterPricesAhead => "better_prices_ahead",
        }
    }
}

/// One concrete derived value
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    /// Price in EUR/kWh
    Price(f64),
    Level(PriceLevel),
    Period(PricePeriod),
    /// Available power in watts
    Power(f64),
    Count(usize),
    /// 1-based rank of the current hour within its day, cheapest first
    Position(usize),
    Ratio(f64),
    Timestamp(DateTime<Utc>),
    /// Zero-padded HH:MM time remaining
    Remaining(String),
}

/// Outcome of deriving one sensor kind
///
/// `Unknown` means the computation ran but has no qualifying answer;
/// `Unavailable` means there was no underlying data to compute from.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedValue {
    Value(SensorValue),
    Unknown,
    Unavailable,
}

impl DerivedValue {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn value(&self) -> Option<&SensorValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Immutable view of the engine published after every mutation
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: CoordinatorState,
    pub zone: TariffZone,
    pub tz: Tz,
    pub target: BetterPriceTarget,
    pub power_p1_kw: f64,
    pub power_p3_kw: f64,
    pub source: DataSource,
    /// Retail price series from the last good refresh
    pub series: Option<PriceSeries>,
    /// Token-gated indicator series
    pub aux: BTreeMap<Indicator, PriceSeries>,
    /// Per-indicator availability from the last refresh
    pub availability: BTreeMap<Indicator, bool>,
    pub holidays: HolidayCache,
    pub last_refresh: Option<DateTime<Utc>>,
    pub total_refreshes: u64,
    pub failed_refreshes: u64,
}
