//! National holiday calendar for tariff classification
//!
//! On a national holiday the whole day bills as the off-peak period, so the
//! classifier needs a reliable year-to-dates mapping. Two providers exist:
//! the official working-calendar CSV export (default) and a fixed rule
//! table that needs no download. Raw records pass through a selection step
//! before entering the cache:
//!
//! - weekend-falling holidays are dropped (weekends are off-peak already)
//! - "Viernes Santo" is dropped (movable, not a fixed-date national day)
//! - duplicate dates collapse to the first entry
//! - Nov 1 and Dec 6 are force-added when they land on a weekday, as are
//!   Jan 1 and Jan 6 of the following year
//!
//! The cache keeps whatever it has on refresh failure and answers `false`
//! for unknown years.

use crate::error::{Result, TarifaError};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Official Spanish working-calendar CSV export.
///
/// A `{year}` placeholder in a configured URL is substituted before the
/// request; the default endpoint serves the current year without one.
pub const DEFAULT_DATASET_URL: &str =
    "https://www.seg-social.es/wps/PA_POINCALAB/CalendarioServlet?exportacion=CSV&tipo=2";

/// Fixed-date holidays force-added for the refreshed year when on a weekday
const FIXED_HOLIDAYS: &[(u32, u32, &str)] = &[
    (11, 1, "Todos los Santos"),
    (12, 6, "Día de la Constitución"),
];

/// Next-year fixed dates appended so the year boundary is covered before
/// the next year's dataset is published
const NEXT_YEAR_FIXED_HOLIDAYS: &[(u32, u32, &str)] =
    &[(1, 1, "Año Nuevo"), (1, 6, "Epifanía del Señor")];

/// National fixed-date holidays for the computed provider.
///
/// Viernes Santo is movable and always dropped by selection, so the rule
/// table carries fixed dates only.
const NATIONAL_FIXED: &[(u32, u32, &str)] = &[
    (1, 1, "Año Nuevo"),
    (1, 6, "Epifanía del Señor"),
    (5, 1, "Fiesta del Trabajo"),
    (8, 15, "Asunción de la Virgen"),
    (10, 12, "Fiesta Nacional de España"),
    (11, 1, "Todos los Santos"),
    (12, 6, "Día de la Constitución"),
    (12, 8, "Inmaculada Concepción"),
    (12, 25, "Natividad del Señor"),
];

/// Accent-folded dataset descriptions mapped to their canonical names
const CANONICAL_NAMES: &[(&str, &str)] = &[
    ("ano nuevo", "Año Nuevo"),
    ("epifania del senor", "Epifanía del Señor"),
    ("viernes santo", "Viernes Santo"),
    ("fiesta del trabajo", "Fiesta del Trabajo"),
    ("asuncion de la virgen", "Asunción de la Virgen"),
    ("fiesta nacional de espana", "Fiesta Nacional de España"),
    ("todos los santos", "Todos los Santos"),
    ("dia de la constitucion", "Día de la Constitución"),
    ("dia de la constitucion espanola", "Día de la Constitución"),
    ("inmaculada concepcion", "Inmaculada Concepción"),
    ("natividad del senor", "Natividad del Señor"),
];

/// Where the yearly holiday set comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidaySource {
    /// Official working-calendar CSV export
    #[default]
    Dataset,
    /// Fixed national rules, no download required
    Computed,
}

impl HolidaySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolidaySource::Dataset => "dataset",
            HolidaySource::Computed => "computed",
        }
    }
}

/// One holiday entry as loaded from a provider, before selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolidayRecord {
    pub day: NaiveDate,
    pub description: String,
    pub holiday_type: String,
    pub province: String,
    pub locality: String,
}

impl HolidayRecord {
    /// A national-scope record with empty province/locality fields
    pub fn national(day: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            day,
            description: description.into(),
            holiday_type: "Nacional".to_string(),
            province: String::new(),
            locality: String::new(),
        }
    }
}

/// Source of raw holiday records for one year
#[async_trait]
pub trait HolidayProvider: Send + Sync {
    /// Raw records for `year`, before selection rules apply
    async fn holidays_for(&self, year: i32) -> Result<Vec<HolidayRecord>>;

    /// Short name for log lines
    fn name(&self) -> &'static str;
}

/// Provider backed by the fixed national rule table
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputedHolidayProvider;

#[async_trait]
impl HolidayProvider for ComputedHolidayProvider {
    async fn holidays_for(&self, year: i32) -> Result<Vec<HolidayRecord>> {
        Ok(computed_national_holidays(year))
    }

    fn name(&self) -> &'static str {
        "computed"
    }
}

/// National fixed-date holidays of one year from the rule table
pub fn computed_national_holidays(year: i32) -> Vec<HolidayRecord> {
    NATIONAL_FIXED
        .iter()
        .filter_map(|&(month, day, name)| {
            NaiveDate::from_ymd_opt(year, month, day)
                .map(|d| HolidayRecord::national(d, name))
        })
        .collect()
}

/// Provider downloading the official working-calendar CSV
#[cfg(feature = "esios")]
pub struct DatasetHolidayProvider {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "esios")]
impl DatasetHolidayProvider {
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("tarifa/{}", crate::APP_VERSION))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn resolved_url(&self, year: i32) -> String {
        if self.url.contains("{year}") {
            self.url.replace("{year}", &year.to_string())
        } else {
            self.url.clone()
        }
    }
}

#[cfg(feature = "esios")]
#[async_trait]
impl HolidayProvider for DatasetHolidayProvider {
    async fn holidays_for(&self, year: i32) -> Result<Vec<HolidayRecord>> {
        let url = self.resolved_url(year);
        debug!("Downloading holiday dataset from {}", url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "text/csv,*/*;q=0.8")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TarifaError::holiday(format!(
                "Dataset request failed with status {}",
                response.status()
            )));
        }
        let text = response.text().await?;
        debug!("Holiday dataset downloaded ({} characters)", text.len());
        parse_dataset_csv(&text)
    }

    fn name(&self) -> &'static str {
        "dataset"
    }
}

/// Parse the working-calendar CSV export into holiday records.
///
/// The header must carry the FECHA, DESCRIPCION, TIPO, PROVINCIA and
/// LOCALIDAD columns. Rows with a missing date or description, or a date
/// not in `DD-MM-YYYY` form, are discarded with a log line.
pub fn parse_dataset_csv(text: &str) -> Result<Vec<HolidayRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h.trim() == name);

    let required = ["FECHA", "DESCRIPCION", "TIPO", "PROVINCIA", "LOCALIDAD"];
    let missing: Vec<&str> = required.iter().copied().filter(|n| col(n).is_none()).collect();
    if !missing.is_empty() {
        return Err(TarifaError::holiday(format!(
            "Dataset header is incomplete, missing columns: {}",
            missing.join(", ")
        )));
    }
    let (Some(fecha), Some(descripcion), Some(tipo), Some(provincia), Some(localidad)) = (
        col("FECHA"),
        col("DESCRIPCION"),
        col("TIPO"),
        col("PROVINCIA"),
        col("LOCALIDAD"),
    ) else {
        return Err(TarifaError::holiday("Dataset header is incomplete"));
    };

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let line_no = index + 2;
        let row = row?;
        let raw_date = row.get(fecha).unwrap_or("").trim();
        let raw_description = row.get(descripcion).unwrap_or("").trim();
        if raw_date.is_empty() || raw_description.is_empty() {
            warn!(
                "Dataset line {} discarded: missing FECHA or DESCRIPCION",
                line_no
            );
            continue;
        }
        let Ok(day) = NaiveDate::parse_from_str(raw_date, "%d-%m-%Y") else {
            warn!(
                "Dataset line {} discarded: invalid date {:?}",
                line_no, raw_date
            );
            continue;
        };
        records.push(HolidayRecord {
            day,
            description: canonical_name(raw_description),
            holiday_type: row.get(tipo).unwrap_or("").trim().to_string(),
            province: row.get(provincia).unwrap_or("").trim().to_string(),
            locality: row.get(localidad).unwrap_or("").trim().to_string(),
        });
    }

    if records.is_empty() {
        return Err(TarifaError::holiday("No valid holidays found in dataset"));
    }
    Ok(records)
}

/// Apply the tariff selection rules to raw records for one year.
///
/// Returns a date-ordered map including the force-added fixed dates of
/// `year` and of the following January.
pub fn select_pvpc_holidays(
    records: &[HolidayRecord],
    year: i32,
) -> BTreeMap<NaiveDate, String> {
    let mut selected: BTreeMap<NaiveDate, String> = BTreeMap::new();

    let mut ordered: Vec<&HolidayRecord> = records.iter().collect();
    ordered.sort_by(|a, b| (a.day, &a.description).cmp(&(b.day, &b.description)));

    for record in ordered {
        if record.day.year() != year {
            debug!(
                "Excluding {} ({}): outside year {}",
                record.day, record.description, year
            );
            continue;
        }
        if is_weekend(record.day) {
            debug!(
                "Excluding {} ({}): falls on a weekend",
                record.day, record.description
            );
            continue;
        }
        if normalize(&record.description) == "viernes santo" {
            debug!("Excluding {} ({}): movable date", record.day, record.description);
            continue;
        }
        if let Some(existing) = selected.get(&record.day) {
            debug!(
                "Excluding {} ({}): date already present as {}",
                record.day, record.description, existing
            );
            continue;
        }
        selected.insert(record.day, record.description.clone());
    }

    append_fixed(&mut selected, year, FIXED_HOLIDAYS);
    append_fixed(&mut selected, year + 1, NEXT_YEAR_FIXED_HOLIDAYS);
    selected
}

fn append_fixed(
    selected: &mut BTreeMap<NaiveDate, String>,
    year: i32,
    fixed: &[(u32, u32, &str)],
) {
    for &(month, day, description) in fixed {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        if is_weekend(date) {
            debug!("Skipping fixed {} ({}): falls on a weekend", date, description);
            continue;
        }
        selected
            .entry(date)
            .or_insert_with(|| description.to_string());
    }
}

/// Jan 1 and Jan 6 of `year`, weekdays only.
///
/// Used to keep the year boundary classified while the new year's dataset
/// is not yet available.
pub fn provisional_january_holidays(year: i32) -> BTreeSet<NaiveDate> {
    [(1, 1), (1, 6)]
        .iter()
        .filter_map(|&(month, day)| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|date| !is_weekend(*date))
        .collect()
}

/// Load one year through a provider and apply the selection rules
pub async fn load_pvpc_holidays(
    provider: &dyn HolidayProvider,
    year: i32,
) -> Result<BTreeMap<NaiveDate, String>> {
    let records = provider.holidays_for(year).await?;
    debug!(
        "Loaded {} holiday records from source={} for year {}",
        records.len(),
        provider.name(),
        year
    );
    Ok(select_pvpc_holidays(&records, year))
}

pub fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_name(name: &str) -> String {
    let key = normalize(name);
    CANONICAL_NAMES
        .iter()
        .find(|(from, _)| *from == key)
        .map_or_else(
            || name.split_whitespace().collect::<Vec<_>>().join(" "),
            |(_, to)| (*to).to_string(),
        )
}

/// Year-keyed holiday cache with refresh bookkeeping.
///
/// A successful refresh replaces the refreshed year and merges the
/// spill-over January dates into the following year. Failed refreshes
/// never touch stored data; unknown years answer `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolidayCache {
    #[serde(default)]
    dates: BTreeMap<i32, BTreeSet<NaiveDate>>,

    /// Years with a completed full refresh
    #[serde(default)]
    refreshed_years: BTreeSet<i32>,

    /// Years holding only provisional January entries
    #[serde(default)]
    provisional_years: BTreeSet<i32>,
}

impl HolidayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `day` is a selected national holiday. Fail-open: unknown
    /// years answer `false`.
    pub fn is_holiday(&self, day: NaiveDate) -> bool {
        self.dates
            .get(&day.year())
            .is_some_and(|set| set.contains(&day))
    }

    pub fn is_year_refreshed(&self, year: i32) -> bool {
        self.refreshed_years.contains(&year)
    }

    pub fn is_year_provisional(&self, year: i32) -> bool {
        self.provisional_years.contains(&year)
    }

    /// Store a successful refresh for `year`.
    ///
    /// Dates of `year` replace its stored set; dates of other years (the
    /// appended next-January entries) merge into their own year without
    /// overwriting a full set already there.
    pub fn store_refresh(&mut self, year: i32, selected: &BTreeMap<NaiveDate, String>) {
        let own: BTreeSet<NaiveDate> = selected
            .keys()
            .filter(|d| d.year() == year)
            .copied()
            .collect();
        self.dates.insert(year, own);
        for day in selected.keys().filter(|d| d.year() != year) {
            self.dates.entry(day.year()).or_default().insert(*day);
        }
        self.refreshed_years.insert(year);
        self.provisional_years.remove(&year);
    }

    /// Merge provisional entries for `year` without marking it refreshed
    pub fn store_provisional(&mut self, year: i32, days: &BTreeSet<NaiveDate>) {
        self.dates.entry(year).or_default().extend(days.iter().copied());
        self.provisional_years.insert(year);
    }

    pub fn known_years(&self) -> Vec<i32> {
        self.dates.keys().copied().collect()
    }

    pub fn year_dates(&self, year: i32) -> Option<&BTreeSet<NaiveDate>> {
        self.dates.get(&year)
    }
}
