//! Relative price-level classification
//!
//! An hour's price is bucketed against its day's min-max range. The ratio
//! buckets mirror the five-step scale used by the PVPC sensors, with
//! boundaries belonging to the cheaper bucket.

use serde::{Deserialize, Serialize};

/// Relative price level of one hour versus its day's range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Neutral,
    Expensive,
    VeryExpensive,
}

impl PriceLevel {
    /// Bucket a day ratio into a level. Boundaries are inclusive, so an
    /// exact 0.20 still classifies as very cheap.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio <= 0.20 {
            Self::VeryCheap
        } else if ratio <= 0.40 {
            Self::Cheap
        } else if ratio <= 0.60 {
            Self::Neutral
        } else if ratio <= 0.80 {
            Self::Expensive
        } else {
            Self::VeryExpensive
        }
    }

    /// Classify a price against its day's extremes
    pub fn classify(price: f64, day_min: f64, day_max: f64) -> Self {
        Self::from_ratio(price_ratio(price, day_min, day_max))
    }

    pub fn from_label(s: &str) -> Self {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "very_cheap" => Self::VeryCheap,
            "cheap" => Self::Cheap,
            "expensive" => Self::Expensive,
            "very_expensive" => Self::VeryExpensive,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryCheap => "very_cheap",
            Self::Cheap => "cheap",
            Self::Neutral => "neutral",
            Self::Expensive => "expensive",
            Self::VeryExpensive => "very_expensive",
        }
    }
}

/// Position of a price within `[day_min, day_max]`, in `0.0..=1.0`.
///
/// A flat day (min == max) counts as 0: every hour is as cheap as the day
/// gets, so the whole day classifies as very cheap.
pub fn price_ratio(price: f64, day_min: f64, day_max: f64) -> f64 {
    let span = day_max - day_min;
    if span <= f64::EPSILON {
        return 0.0;
    }
    (price - day_min) / span
}

/// User-selected acceptance threshold for the better-price search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BetterPriceTarget {
    #[default]
    Neutral,
    Cheap,
    VeryCheap,
}

impl BetterPriceTarget {
    /// Cheapest level still accepted by this target
    pub fn as_level(&self) -> PriceLevel {
        match self {
            Self::Neutral => PriceLevel::Neutral,
            Self::Cheap => PriceLevel::Cheap,
            Self::VeryCheap => PriceLevel::VeryCheap,
        }
    }

    /// Highest day ratio still accepted by this target
    pub fn max_ratio(&self) -> f64 {
        match self {
            Self::Neutral => 0.6,
            Self::Cheap => 0.4,
            Self::VeryCheap => 0.2,
        }
    }

    /// Whether `level` is target-or-cheaper
    pub fn accepts(&self, level: PriceLevel) -> bool {
        level <= self.as_level()
    }

    pub fn from_label(s: &str) -> Self {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "very_cheap" => Self::VeryCheap,
            "cheap" => Self::Cheap,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Cheap => "cheap",
            Self::VeryCheap => "very_cheap",
        }
    }
}
