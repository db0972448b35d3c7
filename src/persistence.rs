//! Persistence layer for engine state
//!
//! Stores the holiday cache, the last-known-good hourly prices and a
//! snapshot of the active configuration so a restart can classify and
//! display immediately, before the first refresh completes. The file is
//! versioned; older schemas migrate forward with explicit defaults on
//! load, they are never dropped.

use crate::config::Config;
use crate::error::Result;
use crate::esios::{DataSource, Indicator};
use crate::holidays::{HolidayCache, HolidaySource};
use crate::logging::get_logger;
use crate::periods::TariffZone;
use crate::series::HourlyPrice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current persisted-state schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Configuration snapshot used to detect stale persisted data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub zone: TariffZone,
    pub holiday_source: HolidaySource,
    pub power_p1_kw: f64,
    pub power_p3_kw: f64,
    pub using_private_api: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            zone: TariffZone::default(),
            holiday_source: HolidaySource::default(),
            power_p1_kw: 3.3,
            power_p3_kw: 3.3,
            using_private_api: false,
        }
    }
}

impl ConfigSnapshot {
    pub fn of(config: &Config) -> Self {
        Self {
            zone: config.zone,
            holiday_source: config.holidays.source,
            power_p1_kw: config.power.p1_kw,
            power_p3_kw: config.power.p3_kw,
            using_private_api: config.using_private_api(),
        }
    }
}

/// Persistent engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub schema_version: u32,

    /// Year-keyed holiday cache
    pub holidays: HolidayCache,

    /// Raw hourly prices per indicator from the last good refresh
    pub prices: BTreeMap<Indicator, Vec<HourlyPrice>>,

    /// API mode that produced the stored prices
    pub source: DataSource,

    /// Instant of the last successful price refresh
    pub last_refresh: Option<DateTime<Utc>>,

    /// Configuration active when the state was written
    pub config: ConfigSnapshot,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            holidays: HolidayCache::default(),
            prices: BTreeMap::new(),
            source: DataSource::default(),
            last_refresh: None,
            config: ConfigSnapshot::default(),
        }
    }
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    state: PersistedState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(file_path: &str) -> Self {
        let logger = get_logger("persistence");
        let state = PersistedState::default();

        Self {
            file_path: file_path.to_string(),
            state,
            logger,
        }
    }

    /// Load state from disk, migrating older schemas forward
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        self.state = migrate_state(value)?;
        self.logger.info(&format!(
            "Loaded persistent state from disk (schema v{})",
            self.state.schema_version
        ));

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PersistedState {
        &mut self.state
    }

    /// Drop persisted data the active configuration invalidates.
    ///
    /// Prices are zone-specific, so a zone change discards them; a holiday
    /// source change discards the cached calendar. The snapshot is updated
    /// to the active configuration either way.
    pub fn reconcile(&mut self, config: &Config) {
        let active = ConfigSnapshot::of(config);

        if self.state.config.zone != active.zone && !self.state.prices.is_empty() {
            self.logger.info(&format!(
                "Tariff zone changed ({} -> {}), discarding stored prices",
                self.state.config.zone.as_str(),
                active.zone.as_str()
            ));
            self.state.prices.clear();
            self.state.last_refresh = None;
        }

        if self.state.config.holiday_source != active.holiday_source
            && !self.state.holidays.known_years().is_empty()
        {
            self.logger.info(&format!(
                "Holiday source changed ({} -> {}), discarding cached calendar",
                self.state.config.holiday_source.as_str(),
                active.holiday_source.as_str()
            ));
            self.state.holidays = HolidayCache::default();
        }

        self.state.config = active;
    }
}

/// Deserialize a persisted state value, applying forward migrations
fn migrate_state(mut value: serde_json::Value) -> Result<PersistedState> {
    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1) as u32;

    if version < 2 {
        migrate_v1_to_v2(&mut value);
    }

    let mut state: PersistedState = serde_json::from_value(value)?;
    state.schema_version = SCHEMA_VERSION;
    Ok(state)
}

/// v1 kept a single contracted power and free-form tariff labels
fn migrate_v1_to_v2(value: &mut serde_json::Value) {
    let Some(config) = value.get_mut("config").and_then(serde_json::Value::as_object_mut)
    else {
        return;
    };

    if let Some(power) = config.remove("power_kw") {
        config
            .entry("power_p1_kw")
            .or_insert_with(|| power.clone());
        config.entry("power_p3_kw").or_insert(power);
    }

    let normalized = match config.get("zone").and_then(serde_json::Value::as_str) {
        Some("2.0TD") => Some("peninsula"),
        Some("2.0TD (Ceuta/Melilla)") | Some("2.0TD (Ceuta y Melilla)") => {
            Some("ceuta_melilla")
        }
        _ => None,
    };
    if let Some(zone) = normalized {
        config.insert("zone".to_string(), serde_json::Value::String(zone.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_v1_power_and_zone_labels() {
        let v1 = serde_json::json!({
            "schema_version": 1,
            "config": {
                "zone": "2.0TD (Ceuta/Melilla)",
                "power_kw": 4.6
            }
        });
        let state = migrate_state(v1).unwrap();
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.config.zone, TariffZone::CeutaMelilla);
        assert_eq!(state.config.power_p1_kw, 4.6);
        assert_eq!(state.config.power_p3_kw, 4.6);
        // Absent in v1, filled with the default
        assert_eq!(state.config.holiday_source, HolidaySource::Dataset);
    }

    #[test]
    fn missing_version_is_treated_as_v1() {
        let legacy = serde_json::json!({
            "config": { "zone": "2.0TD", "power_kw": 3.3 }
        });
        let state = migrate_state(legacy).unwrap();
        assert_eq!(state.config.zone, TariffZone::Peninsula);
    }

    #[test]
    fn current_schema_passes_through() {
        let state = PersistedState::default();
        let value = serde_json::to_value(&state).unwrap();
        let restored = migrate_state(value).unwrap();
        assert_eq!(restored, state);
    }
}
