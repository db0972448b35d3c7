//! Refresh coordination and derived-value serving
//!
//! The coordinator owns one price series and one holiday cache. Background
//! work runs on independent cadences inside a single select loop: the price
//! fetch (on startup and roughly every half hour, picking up tomorrow's
//! day once published), an hourly holiday-rollover check, and an optional
//! fast tick that republishes the snapshot so time-remaining values stay
//! fresh without refetching.
//!
//! Readers never see partial state: every successful refresh swaps a new
//! immutable snapshot into a watch channel, and a failed refresh leaves the
//! previous one in place.

mod derived;
mod runtime;
mod types;

pub use types::{
    CoordinatorCommand, CoordinatorSnapshot, CoordinatorState, DerivedValue, SensorKind,
    SensorValue,
};

use crate::config::{Config, FastCadence};
use crate::error::Result;
use crate::esios::{DataSource, Indicator, PriceProvider};
use crate::holidays::{HolidayCache, HolidayProvider};
use crate::persistence::PersistenceManager;
use crate::series::PriceSeries;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;

/// Price refresh coordinator and snapshot publisher
pub struct Coordinator {
    pub(crate) config: Config,
    pub(crate) tz: Tz,
    pub(crate) logger: crate::logging::StructuredLogger,
    pub(crate) provider: Arc<dyn PriceProvider>,
    pub(crate) holiday_provider: Arc<dyn HolidayProvider>,
    pub(crate) persistence: PersistenceManager,
    pub(crate) state: watch::Sender<CoordinatorState>,
    pub(crate) commands_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
    pub(crate) commands_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    pub(crate) shutdown_tx: mpsc::UnboundedSender<()>,
    pub(crate) shutdown_rx: mpsc::UnboundedReceiver<()>,
    pub(crate) snapshot_tx: watch::Sender<Arc<CoordinatorSnapshot>>,
    pub(crate) snapshot_rx: watch::Receiver<Arc<CoordinatorSnapshot>>,

    /// Retail price series from the last good refresh
    pub(crate) series: Option<PriceSeries>,
    /// Token-gated indicator series, keyed by indicator
    pub(crate) aux: BTreeMap<Indicator, PriceSeries>,
    pub(crate) availability: BTreeMap<Indicator, bool>,
    pub(crate) source: DataSource,
    pub(crate) holidays: HolidayCache,
    /// Years warmed in this process run; a restart re-warms from the source
    pub(crate) holiday_years_warmed: BTreeSet<i32>,
    pub(crate) last_refresh: Option<DateTime<Utc>>,
    pub(crate) total_refreshes: u64,
    pub(crate) failed_refreshes: u64,
}

impl Coordinator {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    /// The last good price series, if any refresh or restore succeeded
    pub fn current_series(&self) -> Option<&PriceSeries> {
        self.series.as_ref()
    }

    /// Latest published snapshot
    pub fn latest_snapshot(&self) -> Arc<CoordinatorSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Answer one sensor kind against the latest snapshot
    pub fn derived_value(&self, kind: SensorKind, now: DateTime<Utc>) -> DerivedValue {
        self.latest_snapshot().derived_value(kind, now)
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<CoordinatorSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// Snapshot updates as an async stream, yielding the current value first
    pub fn snapshot_stream(&self) -> WatchStream<Arc<CoordinatorSnapshot>> {
        WatchStream::new(self.snapshot_rx.clone())
    }

    pub fn command_sender(&self) -> mpsc::UnboundedSender<CoordinatorCommand> {
        self.commands_tx.clone()
    }

    /// Sender that stops the run loop when signalled
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    pub(crate) fn enabled_indicators(&self) -> &'static [Indicator] {
        if self.config.using_private_api() {
            Indicator::private_set()
        } else {
            Indicator::public_set()
        }
    }

    pub(crate) fn fast_period(&self) -> Option<std::time::Duration> {
        match self.config.fast_cadence {
            FastCadence::Off => None,
            FastCadence::Hourly => Some(std::time::Duration::from_secs(3600)),
            FastCadence::EveryMinute => Some(std::time::Duration::from_secs(60)),
        }
    }

    /// Handle one command; returns true when the fast cadence changed
    pub(crate) async fn handle_command(&mut self, command: CoordinatorCommand) -> bool {
        match command {
            CoordinatorCommand::SetBetterPriceTarget(target) => {
                self.logger
                    .info(&format!("Better-price target set to {}", target.as_str()));
                self.config.better_price_target = target;
                self.publish_snapshot();
                false
            }
            CoordinatorCommand::SetFastCadence(cadence) => {
                self.logger
                    .info(&format!("Fast cadence set to {}", cadence.as_str()));
                self.config.fast_cadence = cadence;
                self.publish_snapshot();
                true
            }
            CoordinatorCommand::RefreshNow => {
                if let Err(err) = self.refresh_cycle(true).await {
                    self.failed_refreshes += 1;
                    self.logger
                        .error(&format!("Manual refresh failed: {}", err));
                    self.publish_snapshot();
                }
                false
            }
        }
    }

    pub(crate) fn build_snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            timestamp: Utc::now(),
            state: self.current_state(),
            zone: self.config.zone,
            tz: self.tz,
            target: self.config.better_price_target,
            power_p1_kw: self.config.power.p1_kw,
            power_p3_kw: self.config.power.p3_kw,
            source: self.source,
            series: self.series.clone(),
            aux: self.aux.clone(),
            availability: self.availability.clone(),
            holidays: self.holidays.clone(),
            last_refresh: self.last_refresh,
            total_refreshes: self.total_refreshes,
            failed_refreshes: self.failed_refreshes,
        }
    }

    pub(crate) fn publish_snapshot(&self) {
        let snapshot = Arc::new(self.build_snapshot());
        self.snapshot_tx.send(snapshot).ok();
    }

    /// Copy live engine data into the persisted state
    pub(crate) fn sync_persisted_state(&mut self) {
        let mut prices = BTreeMap::new();
        if let Some(series) = &self.series {
            prices.insert(Indicator::Pvpc, series.prices().to_vec());
        }
        for (indicator, series) in &self.aux {
            prices.insert(*indicator, series.prices().to_vec());
        }

        let holidays = self.holidays.clone();
        let source = self.source;
        let last_refresh = self.last_refresh;

        let state = self.persistence.state_mut();
        state.prices = prices;
        state.holidays = holidays;
        state.source = source;
        state.last_refresh = last_refresh;
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.logger.info("Shutting down price engine");
        self.sync_persisted_state();
        if let Err(err) = self.persistence.save() {
            self.logger
                .warn(&format!("Failed to persist state during shutdown: {}", err));
        }
        Ok(())
    }
}
