//! Engine construction and the background refresh loop

use super::{Coordinator, CoordinatorCommand, CoordinatorSnapshot, CoordinatorState};
use crate::config::Config;
use crate::error::{Result, TarifaError};
use crate::esios::{DataSource, FetchedPrices, Indicator, PriceProvider};
use crate::holidays::{self, HolidayCache, HolidayProvider, HolidaySource};
use crate::logging::get_logger;
use crate::persistence::PersistenceManager;
use crate::series::PriceSeries;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

/// Local hour after which ESIOS publishes the next day's prices
const TOMORROW_PUBLICATION_HOUR: u32 = 20;

/// Cadence of the holiday-calendar rollover check
const HOLIDAY_CHECK_SECS: u64 = 3600;

impl Coordinator {
    /// Build the engine from the ambient configuration, wiring the real
    /// ESIOS and holiday providers.
    pub async fn new(
        commands_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
        commands_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    ) -> Result<Self> {
        let config = Config::load()?;
        crate::logging::init_logging(&config.logging)?;

        let provider = build_price_provider(&config)?;
        let holiday_provider = build_holiday_provider(&config)?;
        Self::with_providers(config, provider, holiday_provider, commands_rx, commands_tx).await
    }

    /// Build the engine around explicit providers. Used by tests and by
    /// hosts that bring their own price source.
    pub async fn with_providers(
        config: Config,
        provider: Arc<dyn PriceProvider>,
        holiday_provider: Arc<dyn HolidayProvider>,
        commands_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
        commands_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    ) -> Result<Self> {
        config.validate()?;
        let tz = config.tz();
        let logger = get_logger("coordinator");

        let mut persistence = PersistenceManager::new(&config.state_file);
        if let Err(err) = persistence.load() {
            logger.warn(&format!("Starting with fresh state, load failed: {}", err));
        }
        persistence.reconcile(&config);

        let (state_tx, _state_rx) = watch::channel(CoordinatorState::Initializing);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial_snapshot(&config, tz)));

        let source = if config.using_private_api() {
            DataSource::Private
        } else {
            DataSource::Public
        };

        let mut coordinator = Self {
            config,
            tz,
            logger,
            provider,
            holiday_provider,
            persistence,
            state: state_tx,
            commands_rx,
            commands_tx,
            shutdown_tx,
            shutdown_rx,
            snapshot_tx,
            snapshot_rx,
            series: None,
            aux: BTreeMap::new(),
            availability: BTreeMap::new(),
            source,
            holidays: HolidayCache::default(),
            holiday_years_warmed: BTreeSet::new(),
            last_refresh: None,
            total_refreshes: 0,
            failed_refreshes: 0,
        };
        coordinator.restore_from_persistence();
        coordinator.publish_snapshot();
        Ok(coordinator)
    }

    /// Main loop: price refreshes, holiday rollover checks, fast snapshot
    /// ticks, and command handling, until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Starting price engine (zone {}, {} indicators)",
            self.config.zone.as_str(),
            self.enabled_indicators().len()
        ));
        self.state.send_replace(CoordinatorState::Running);
        self.publish_snapshot();

        let price_period =
            StdDuration::from_secs(self.config.refresh.price_interval_minutes * 60);
        let mut price_interval = time::interval(price_period);
        price_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut holiday_interval = time::interval(StdDuration::from_secs(HOLIDAY_CHECK_SECS));
        holiday_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first price tick warms the calendar; the rollover
        // check only needs to run from the next hour on.
        holiday_interval.tick().await;

        let mut fast_interval = self.fast_period().map(time::interval);

        loop {
            tokio::select! {
                _ = price_interval.tick() => {
                    if let Err(err) = self.refresh_cycle(false).await {
                        self.failed_refreshes += 1;
                        self.logger.error(&format!("Price refresh failed: {}", err));
                        if self.series.is_none() {
                            self.state.send_replace(CoordinatorState::Error(err.to_string()));
                        }
                        self.publish_snapshot();
                    }
                }
                _ = holiday_interval.tick() => {
                    self.holiday_rollover_check().await;
                }
                _ = tick_opt(&mut fast_interval) => {
                    self.publish_snapshot();
                }
                Some(command) = self.commands_rx.recv() => {
                    if self.handle_command(command).await {
                        fast_interval = self.fast_period().map(time::interval);
                    }
                }
                Some(()) = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.state.send_replace(CoordinatorState::ShuttingDown);
        self.publish_snapshot();
        self.shutdown().await
    }

    /// One refresh pass: warm the holiday calendar, fetch today (and after
    /// the publication hour, tomorrow), rebuild the series, persist, and
    /// publish. A failure leaves the previous series serving.
    pub(crate) async fn refresh_cycle(&mut self, force: bool) -> Result<()> {
        let now = Utc::now();
        self.warm_holiday_cache(now).await;

        let local_now = now.with_timezone(&self.tz);
        let today = local_now.date_naive();
        let want_tomorrow = local_now.hour() >= TOMORROW_PUBLICATION_HOUR;

        let covers_today = self
            .series
            .as_ref()
            .is_some_and(|s| s.covered_dates().contains(&today));
        let covers_tomorrow = self.series.as_ref().is_some_and(|s| s.covers_beyond(today));
        if !force && covers_today && (!want_tomorrow || covers_tomorrow) {
            self.logger.debug("Price data already current, skipping fetch");
            return Ok(());
        }

        let indicators = self.enabled_indicators();
        let fetched_today = self.provider.fetch_day(today, indicators).await?;

        let mut fetched_tomorrow = None;
        if want_tomorrow && let Some(day) = today.succ_opt() {
            match self.provider.fetch_day(day, indicators).await {
                Ok(fetched) => fetched_tomorrow = Some(fetched),
                Err(err) => {
                    self.logger
                        .debug(&format!("Tomorrow's prices not available yet: {}", err));
                }
            }
        }

        self.apply_fetch(fetched_today, fetched_tomorrow)?;
        self.total_refreshes += 1;
        self.last_refresh = Some(now);
        // A success clears a cold-start error regardless of which path
        // triggered the refresh.
        if self.current_state() != CoordinatorState::Running {
            self.state.send_replace(CoordinatorState::Running);
        }

        self.sync_persisted_state();
        if let Err(err) = self.persistence.save() {
            self.logger
                .warn(&format!("Failed to persist refreshed prices: {}", err));
        }
        self.publish_snapshot();
        self.logger.info(&format!(
            "Prices refreshed from {} ({} hours covered)",
            self.provider.name(),
            self.series.as_ref().map_or(0, |s| s.len())
        ));
        Ok(())
    }

    /// Replace the live series with freshly fetched data.
    ///
    /// The retail series is mandatory; an optional indicator that fails to
    /// form a valid series is dropped and flagged unavailable.
    fn apply_fetch(
        &mut self,
        today: FetchedPrices,
        tomorrow: Option<FetchedPrices>,
    ) -> Result<()> {
        let have_tomorrow = tomorrow.is_some();
        let FetchedPrices {
            source,
            series: mut fetched,
            availability: mut avail,
        } = today;
        if let Some(extra) = tomorrow {
            for (indicator, mut prices) in extra.series {
                fetched.entry(indicator).or_default().append(&mut prices);
            }
        }

        let mut pvpc = fetched.remove(&Indicator::Pvpc).unwrap_or_default();
        if pvpc.is_empty() {
            return Err(TarifaError::price_data(
                "Fetched payload carried no retail prices",
            ));
        }
        // A refresh that could not bring tomorrow's day must not narrow a
        // series that already covered it; the held tail is carried over.
        if !have_tomorrow
            && let Some(held) = &self.series
            && let Some(last) = pvpc.last().map(|p| p.ts)
        {
            pvpc.extend(held.entries_after(last).copied());
        }
        let series = PriceSeries::new(pvpc, self.tz)?;

        let mut aux = BTreeMap::new();
        for (indicator, mut prices) in fetched {
            if prices.is_empty() {
                continue;
            }
            if !have_tomorrow
                && let Some(held) = self.aux.get(&indicator)
                && let Some(last) = prices.last().map(|p| p.ts)
            {
                prices.extend(held.entries_after(last).copied());
            }
            match PriceSeries::new(prices, self.tz) {
                Ok(parsed) => {
                    aux.insert(indicator, parsed);
                }
                Err(err) => {
                    self.logger.warn(&format!(
                        "Discarding inconsistent {} series: {}",
                        indicator.key(),
                        err
                    ));
                    avail.insert(indicator, false);
                }
            }
        }

        self.series = Some(series);
        self.aux = aux;
        self.availability = avail;
        self.source = source;
        Ok(())
    }

    /// Load the holiday calendar for the current local year once per
    /// process run. Failure keeps the cached calendar serving; during the
    /// first days of January a provisional set of fixed days fills the gap
    /// until the full load succeeds.
    pub(crate) async fn warm_holiday_cache(&mut self, now: DateTime<Utc>) {
        let local = now.with_timezone(&self.tz);
        let year = local.year();
        if self.holiday_years_warmed.contains(&year) {
            return;
        }

        match holidays::load_pvpc_holidays(self.holiday_provider.as_ref(), year).await {
            Ok(selected) => {
                self.holidays.store_refresh(year, &selected);
                self.holiday_years_warmed.insert(year);
                self.logger.info(&format!(
                    "Holiday calendar for {} loaded from {} ({} days)",
                    year,
                    self.holiday_provider.name(),
                    selected.len()
                ));
                self.sync_persisted_state();
                if let Err(err) = self.persistence.save() {
                    self.logger
                        .warn(&format!("Failed to persist holiday calendar: {}", err));
                }
            }
            Err(err) => {
                if local.month() == 1 && local.day() <= 6 && !self.holidays.is_year_refreshed(year)
                {
                    let provisional = holidays::provisional_january_holidays(year);
                    self.holidays.store_provisional(year, &provisional);
                    self.logger.warn(&format!(
                        "Holiday calendar load failed in early January, \
                         priming provisional fixed days: {}",
                        err
                    ));
                } else {
                    self.logger.warn(&format!(
                        "Holiday calendar load failed, serving cached calendar: {}",
                        err
                    ));
                }
            }
        }
    }

    /// Hourly check that re-warms the calendar after a year rollover or a
    /// failed warm, publishing only when the calendar actually changed.
    async fn holiday_rollover_check(&mut self) {
        let before = self.holidays.clone();
        self.warm_holiday_cache(Utc::now()).await;
        if self.holidays != before {
            self.publish_snapshot();
        }
    }

    /// Rebuild series and calendar from the persisted state, dropping
    /// anything that no longer validates.
    fn restore_from_persistence(&mut self) {
        let state = self.persistence.state().clone();
        self.holidays = state.holidays;

        let mut restored = false;
        for (indicator, prices) in state.prices {
            if prices.is_empty() {
                continue;
            }
            match PriceSeries::new(prices, self.tz) {
                Ok(series) => {
                    if indicator == Indicator::Pvpc {
                        self.series = Some(series);
                        restored = true;
                    } else {
                        self.aux.insert(indicator, series);
                        self.availability.insert(indicator, true);
                    }
                }
                Err(err) => {
                    self.logger.warn(&format!(
                        "Discarding persisted {} prices: {}",
                        indicator.key(),
                        err
                    ));
                }
            }
        }

        if restored {
            self.source = state.source;
            self.last_refresh = state.last_refresh;
            self.logger.info("Restored price series from persisted state");
        }
    }
}

#[cfg(feature = "esios")]
fn build_price_provider(config: &Config) -> Result<Arc<dyn PriceProvider>> {
    Ok(Arc::new(crate::esios::EsiosClient::new(config)?))
}

#[cfg(not(feature = "esios"))]
fn build_price_provider(_config: &Config) -> Result<Arc<dyn PriceProvider>> {
    Err(TarifaError::config(
        "Built without the esios feature; construct the engine with explicit providers",
    ))
}

fn build_holiday_provider(config: &Config) -> Result<Arc<dyn HolidayProvider>> {
    match config.holidays.source {
        HolidaySource::Computed => Ok(Arc::new(holidays::ComputedHolidayProvider)),
        #[cfg(feature = "esios")]
        HolidaySource::Dataset => {
            let provider = holidays::DatasetHolidayProvider::new(
                config.holidays.dataset_url.clone(),
                StdDuration::from_secs(config.holidays.timeout_seconds),
            )?;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "esios"))]
        HolidaySource::Dataset => Err(TarifaError::config(
            "Dataset holiday source requires the esios feature",
        )),
    }
}

fn initial_snapshot(config: &Config, tz: chrono_tz::Tz) -> CoordinatorSnapshot {
    let source = if config.using_private_api() {
        DataSource::Private
    } else {
        DataSource::Public
    };
    CoordinatorSnapshot {
        timestamp: Utc::now(),
        state: CoordinatorState::Initializing,
        zone: config.zone,
        tz,
        target: config.better_price_target,
        power_p1_kw: config.power.p1_kw,
        power_p3_kw: config.power.p3_kw,
        source,
        series: None,
        aux: BTreeMap::new(),
        availability: BTreeMap::new(),
        holidays: HolidayCache::default(),
        last_refresh: None,
        total_refreshes: 0,
        failed_refreshes: 0,
    }
}

/// Await the next tick of an optional interval; pend forever when absent
/// so a disabled fast cadence never wakes the loop.
async fn tick_opt(interval: &mut Option<time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
