//! ESIOS indicator access
//!
//! The upstream publishes hourly values in EUR/MWh per indicator. Two modes
//! exist: the no-token public archive (retail price only) and the
//! token-gated indicator endpoints, which add injection compensation, the
//! gas-adjustment term and the OMIE wholesale reference. Payload parsing is
//! plain serde and always compiled; the HTTP client sits behind the `esios`
//! feature so the engine builds and tests without it.
//!
//! A fetched day is accepted all-or-nothing: anything short of full hourly
//! coverage for the local day is rejected and the previous data stays.

use crate::error::{Result, TarifaError};
use crate::periods::TariffZone;
use crate::series::{self, HourlyPrice};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Public no-token archive endpoint, one local day per request
pub const ARCHIVE_URL: &str =
    "https://api.esios.ree.es/archives/70/download_json?locale=es&date={day}";

/// Token-gated indicator endpoint, one indicator and local day per request
pub const INDICATOR_URL: &str =
    "https://api.esios.ree.es/indicators/{id}?start_date={day}T00:00&end_date={day}T23:59";

/// Hourly indicators served by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// Retail price (PVPC 2.0TD)
    Pvpc,
    /// Surplus injection compensation
    Injection,
    /// Gas-adjustment mechanism term
    Mag,
    /// OMIE day-ahead wholesale reference
    Omie,
}

impl Indicator {
    /// Upstream indicator id
    pub fn id(&self) -> u32 {
        match self {
            Indicator::Pvpc => 1001,
            Indicator::Injection => 1739,
            Indicator::Mag => 1900,
            Indicator::Omie => 10211,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Indicator::Pvpc => "pvpc",
            Indicator::Injection => "injection",
            Indicator::Mag => "mag",
            Indicator::Omie => "omie",
        }
    }

    /// Indicators available without an API token
    pub fn public_set() -> &'static [Indicator] {
        &[Indicator::Pvpc]
    }

    /// Indicators available with an API token
    pub fn private_set() -> &'static [Indicator] {
        &[
            Indicator::Pvpc,
            Indicator::Injection,
            Indicator::Mag,
            Indicator::Omie,
        ]
    }
}

/// Which API mode produced a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Public,
    Private,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Public => "public",
            DataSource::Private => "private",
        }
    }
}

/// One fetched local day across the requested indicators.
///
/// `availability` carries an entry per requested indicator; a `false`
/// entry means the indicator could not be served and its downstream
/// derived values report Unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPrices {
    pub source: DataSource,
    pub series: BTreeMap<Indicator, Vec<HourlyPrice>>,
    pub availability: BTreeMap<Indicator, bool>,
}

impl FetchedPrices {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            series: BTreeMap::new(),
            availability: BTreeMap::new(),
        }
    }

    pub fn pvpc(&self) -> Option<&[HourlyPrice]> {
        self.series.get(&Indicator::Pvpc).map(Vec::as_slice)
    }
}

/// Source of raw hourly prices for whole local days
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Fetch the requested indicators for one local day.
    ///
    /// The retail price indicator is mandatory; a day that cannot serve it
    /// fails as a whole. Optional indicators degrade to `availability =
    /// false` instead.
    async fn fetch_day(&self, day: NaiveDate, indicators: &[Indicator]) -> Result<FetchedPrices>;

    /// Short name for log lines
    fn name(&self) -> &'static str;
}

// Raw payload shapes.

#[derive(Debug, Deserialize)]
struct ArchivePayload {
    #[serde(rename = "PVPC")]
    pvpc: Vec<ArchiveRow>,
}

#[derive(Debug, Deserialize)]
struct ArchiveRow {
    #[serde(rename = "Dia")]
    dia: String,
    #[serde(rename = "Hora")]
    hora: String,
    #[serde(rename = "PCB", default)]
    pcb: Option<String>,
    #[serde(rename = "CYM", default)]
    cym: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndicatorPayload {
    indicator: IndicatorBody,
}

#[derive(Debug, Deserialize)]
struct IndicatorBody {
    values: Vec<IndicatorValue>,
}

#[derive(Debug, Deserialize)]
struct IndicatorValue {
    value: f64,
    datetime: DateTime<FixedOffset>,
    #[serde(default)]
    geo_id: Option<u32>,
}

/// Geo zone ids carried by the token-gated indicator values
fn zone_geo_ids(zone: TariffZone) -> &'static [u32] {
    match zone {
        // Península, Canarias and Baleares share one geo id
        TariffZone::Peninsula => &[8741],
        TariffZone::CeutaMelilla => &[8744, 8745],
    }
}

/// Parse the public archive JSON for one local day.
///
/// Rows arrive in hour order without explicit offsets, so timestamps are
/// assigned sequentially from local midnight. That also covers the 23 and
/// 25 hour clock-change days.
pub fn parse_archive_payload(
    text: &str,
    day: NaiveDate,
    zone: TariffZone,
    tz: Tz,
) -> Result<Vec<HourlyPrice>> {
    let payload: ArchivePayload = serde_json::from_str(text)?;
    let expected = series::hours_in_local_day(day, tz);
    let midnight = series::local_midnight_utc(day, tz);

    let mut prices = Vec::with_capacity(payload.pvpc.len());
    for (index, row) in payload.pvpc.iter().enumerate() {
        let row_day = NaiveDate::parse_from_str(row.dia.trim(), "%d/%m/%Y")?;
        if row_day != day {
            return Err(TarifaError::price_data(format!(
                "archive row {} belongs to {}, requested {}",
                row.hora, row_day, day
            )));
        }
        let raw = match zone {
            TariffZone::Peninsula => row.pcb.as_deref(),
            TariffZone::CeutaMelilla => row.cym.as_deref(),
        };
        let Some(raw) = raw else {
            return Err(TarifaError::price_data(format!(
                "archive row {} has no value for zone {}",
                row.hora,
                zone.as_str()
            )));
        };
        let value = parse_decimal_comma(raw)?;
        prices.push(HourlyPrice::new(
            midnight + Duration::hours(index as i64),
            value / 1000.0,
        ));
    }

    if prices.len() as i64 != expected {
        return Err(TarifaError::price_data(format!(
            "archive for {} has {} hours, expected {}",
            day,
            prices.len(),
            expected
        )));
    }
    Ok(prices)
}

/// Parse a token-gated indicator JSON for one local day.
///
/// Values repeat per geo zone; the configured zone's values are selected
/// when geo ids are present, geo-less indicators pass through unfiltered.
pub fn parse_indicator_payload(
    text: &str,
    day: NaiveDate,
    zone: TariffZone,
    tz: Tz,
) -> Result<Vec<HourlyPrice>> {
    let payload: IndicatorPayload = serde_json::from_str(text)?;
    let geo_ids = zone_geo_ids(zone);
    let zoned = payload
        .indicator
        .values
        .iter()
        .any(|v| v.geo_id.is_some_and(|id| geo_ids.contains(&id)));

    let mut by_ts: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for value in &payload.indicator.values {
        if zoned && !value.geo_id.is_some_and(|id| geo_ids.contains(&id)) {
            continue;
        }
        by_ts
            .entry(value.datetime.with_timezone(&Utc))
            .or_insert(value.value);
    }

    let prices: Vec<HourlyPrice> = by_ts
        .into_iter()
        .map(|(ts, value)| HourlyPrice::new(ts, value / 1000.0))
        .collect();

    let expected = series::hours_in_local_day(day, tz);
    if prices.len() as i64 != expected {
        return Err(TarifaError::price_data(format!(
            "indicator data for {} has {} hours, expected {}",
            day,
            prices.len(),
            expected
        )));
    }
    let midnight = series::local_midnight_utc(day, tz);
    if prices.first().map(|p| p.ts) != Some(midnight) {
        return Err(TarifaError::price_data(format!(
            "indicator data for {} does not start at local midnight",
            day
        )));
    }
    Ok(prices)
}

fn parse_decimal_comma(raw: &str) -> Result<f64> {
    raw.trim()
        .replace('.', "")
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| TarifaError::price_data(format!("unparseable price value {raw:?}")))
}

/// HTTP client for the ESIOS endpoints
#[cfg(feature = "esios")]
pub struct EsiosClient {
    client: reqwest::Client,
    zone: TariffZone,
    tz: Tz,
    token: Option<String>,
}

#[cfg(feature = "esios")]
impl EsiosClient {
    pub fn new(config: &crate::config::Config) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(config.esios.timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("tarifa/{}", crate::APP_VERSION))
            .build()?;
        let token = config
            .using_private_api()
            .then(|| config.esios.api_token.trim().to_string());
        Ok(Self {
            client,
            zone: config.zone,
            tz: config.tz(),
            token,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("x-api-key", token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TarifaError::auth(format!(
                "API token rejected with status {status}"
            )));
        }
        if !status.is_success() {
            return Err(TarifaError::api(format!(
                "request failed with status {status}"
            )));
        }
        Ok(response.text().await?)
    }

    async fn fetch_public_day(&self, day: NaiveDate) -> Result<Vec<HourlyPrice>> {
        let url = ARCHIVE_URL.replace("{day}", &day.format("%Y-%m-%d").to_string());
        debug!("Fetching public archive for {}", day);
        let text = self.get_text(&url).await?;
        parse_archive_payload(&text, day, self.zone, self.tz)
    }

    async fn fetch_private_indicator(
        &self,
        day: NaiveDate,
        indicator: Indicator,
    ) -> Result<Vec<HourlyPrice>> {
        let url = INDICATOR_URL
            .replace("{id}", &indicator.id().to_string())
            .replace("{day}", &day.format("%Y-%m-%d").to_string());
        debug!("Fetching indicator {} for {}", indicator.key(), day);
        let text = self.get_text(&url).await?;
        parse_indicator_payload(&text, day, self.zone, self.tz)
    }
}

#[cfg(feature = "esios")]
#[async_trait]
impl PriceProvider for EsiosClient {
    async fn fetch_day(&self, day: NaiveDate, indicators: &[Indicator]) -> Result<FetchedPrices> {
        let source = if self.token.is_some() {
            DataSource::Private
        } else {
            DataSource::Public
        };
        let mut fetched = FetchedPrices::new(source);

        for &indicator in indicators {
            let result = match source {
                DataSource::Public => {
                    if indicator == Indicator::Pvpc {
                        self.fetch_public_day(day).await
                    } else {
                        // Token-gated indicators cannot be served publicly
                        fetched.availability.insert(indicator, false);
                        continue;
                    }
                }
                DataSource::Private => self.fetch_private_indicator(day, indicator).await,
            };

            match result {
                Ok(prices) => {
                    fetched.availability.insert(indicator, true);
                    fetched.series.insert(indicator, prices);
                }
                Err(err) if indicator == Indicator::Pvpc => return Err(err),
                Err(err @ TarifaError::Auth { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        "Indicator {} unavailable for {}: {}",
                        indicator.key(),
                        day,
                        err
                    );
                    fetched.availability.insert(indicator, false);
                }
            }
        }
        Ok(fetched)
    }

    fn name(&self) -> &'static str {
        "esios"
    }
}

/// Deterministic in-memory provider for tests and offline runs
#[derive(Debug, Default)]
pub struct FixturePriceProvider {
    inner: std::sync::Mutex<FixtureState>,
}

#[derive(Debug, Default)]
struct FixtureState {
    source: DataSource,
    days: BTreeMap<NaiveDate, BTreeMap<Indicator, Vec<HourlyPrice>>>,
    failing: bool,
}

impl FixturePriceProvider {
    pub fn new(source: DataSource) -> Self {
        Self {
            inner: std::sync::Mutex::new(FixtureState {
                source,
                ..FixtureState::default()
            }),
        }
    }

    /// Stage one indicator's prices for a local day
    pub fn set_day(&self, day: NaiveDate, indicator: Indicator, prices: Vec<HourlyPrice>) {
        if let Ok(mut state) = self.inner.lock() {
            state.days.entry(day).or_default().insert(indicator, prices);
        }
    }

    /// Make subsequent fetches fail until cleared
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing = failing;
        }
    }
}

#[async_trait]
impl PriceProvider for FixturePriceProvider {
    async fn fetch_day(&self, day: NaiveDate, indicators: &[Indicator]) -> Result<FetchedPrices> {
        let state = self
            .inner
            .lock()
            .map_err(|_| TarifaError::generic("fixture state poisoned"))?;
        if state.failing {
            return Err(TarifaError::network("fixture provider set to fail"));
        }
        let Some(staged) = state.days.get(&day) else {
            return Err(TarifaError::api(format!("no staged data for {day}")));
        };

        let mut fetched = FetchedPrices::new(state.source);
        for &indicator in indicators {
            match staged.get(&indicator) {
                Some(prices) => {
                    fetched.availability.insert(indicator, true);
                    fetched.series.insert(indicator, prices.clone());
                }
                None if indicator == Indicator::Pvpc => {
                    return Err(TarifaError::api(format!("no staged retail price for {day}")));
                }
                None => {
                    fetched.availability.insert(indicator, false);
                }
            }
        }
        Ok(fetched)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Madrid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn archive_json(hours: usize) -> String {
        let rows: Vec<String> = (0..hours)
            .map(|h| {
                format!(
                    r#"{{"Dia":"02/06/2025","Hora":"{:02}-{:02}","PCB":"{},{:02}","CYM":"140,00"}}"#,
                    h,
                    h + 1,
                    100 + h,
                    50
                )
            })
            .collect();
        format!(r#"{{"PVPC":[{}]}}"#, rows.join(","))
    }

    #[test]
    fn archive_parses_and_converts_to_kwh() {
        let prices = parse_archive_payload(&archive_json(24), day(), TariffZone::Peninsula, Madrid)
            .unwrap();
        assert_eq!(prices.len(), 24);
        // "100,50" EUR/MWh becomes 0.1005 EUR/kWh
        assert!((prices[0].price - 0.1005).abs() < 1e-9);
        assert_eq!(
            prices[0].ts,
            series::local_midnight_utc(day(), Madrid)
        );
    }

    #[test]
    fn archive_zone_selects_its_column() {
        let prices =
            parse_archive_payload(&archive_json(24), day(), TariffZone::CeutaMelilla, Madrid)
                .unwrap();
        assert!((prices[0].price - 0.14).abs() < 1e-9);
    }

    #[test]
    fn short_archive_day_is_rejected() {
        let err = parse_archive_payload(&archive_json(23), day(), TariffZone::Peninsula, Madrid);
        assert!(err.is_err());
    }

    #[test]
    fn indicator_payload_filters_geo_and_converts() {
        let json = r#"{"indicator":{"values":[
            {"value":100.0,"datetime":"2025-06-02T00:00:00.000+02:00","geo_id":8741},
            {"value":999.0,"datetime":"2025-06-02T00:00:00.000+02:00","geo_id":8744}
        ]}}"#;
        // A single zoned hour fails coverage, but the parse itself is checked
        let err = parse_indicator_payload(json, day(), TariffZone::Peninsula, Madrid);
        assert!(err.is_err());

        let rows: Vec<String> = (0..24)
            .map(|h| {
                format!(
                    r#"{{"value":{}.0,"datetime":"2025-06-02T{:02}:00:00.000+02:00","geo_id":8741}}"#,
                    100 + h,
                    h
                )
            })
            .collect();
        let json = format!(r#"{{"indicator":{{"values":[{}]}}}}"#, rows.join(","));
        let prices =
            parse_indicator_payload(&json, day(), TariffZone::Peninsula, Madrid).unwrap();
        assert_eq!(prices.len(), 24);
        assert!((prices[0].price - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fixture_provider_serves_and_fails_on_demand() {
        let provider = FixturePriceProvider::new(DataSource::Public);
        let midnight = series::local_midnight_utc(day(), Madrid);
        let prices: Vec<HourlyPrice> = (0..24)
            .map(|h| HourlyPrice::new(midnight + Duration::hours(h), 0.1))
            .collect();
        provider.set_day(day(), Indicator::Pvpc, prices);

        let fetched = provider.fetch_day(day(), Indicator::public_set()).await.unwrap();
        assert_eq!(fetched.pvpc().map(<[HourlyPrice]>::len), Some(24));

        provider.set_failing(true);
        assert!(provider.fetch_day(day(), Indicator::public_set()).await.is_err());
    }
}
