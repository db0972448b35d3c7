use chrono::NaiveDate;
use tarifa::holidays::{
    ComputedHolidayProvider, HolidayCache, load_pvpc_holidays, provisional_january_holidays,
};

fn day(year: i32, month: u32, dom: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, dom).unwrap()
}

#[tokio::test]
async fn computed_calendar_2025_selects_pvpc_days() {
    let selected = load_pvpc_holidays(&ComputedHolidayProvider, 2025)
        .await
        .unwrap();

    // Weekday national days survive.
    assert!(selected.contains_key(&day(2025, 5, 1)));
    assert!(selected.contains_key(&day(2025, 8, 15)));
    assert!(selected.contains_key(&day(2025, 12, 25)));
    // Weekend days are dropped, including the force-added pair.
    assert!(!selected.contains_key(&day(2025, 10, 12)));
    assert!(!selected.contains_key(&day(2025, 11, 1)));
    assert!(!selected.contains_key(&day(2025, 12, 6)));
    // Next January's fixed days ride along.
    assert!(selected.contains_key(&day(2026, 1, 1)));
    assert!(selected.contains_key(&day(2026, 1, 6)));
    assert_eq!(selected.len(), 8);
}

#[tokio::test]
async fn cache_spills_next_january_into_its_own_year() {
    let selected = load_pvpc_holidays(&ComputedHolidayProvider, 2025)
        .await
        .unwrap();
    let mut cache = HolidayCache::new();
    cache.store_refresh(2025, &selected);

    assert!(cache.is_holiday(day(2025, 5, 1)));
    assert!(cache.is_holiday(day(2026, 1, 6)));
    assert!(cache.is_year_refreshed(2025));
    // Spilled dates do not make the next year count as refreshed.
    assert!(!cache.is_year_refreshed(2026));
    // Unknown days fail open.
    assert!(!cache.is_holiday(day(2025, 7, 15)));
}

#[tokio::test]
async fn failed_yearly_refresh_never_clears_known_answers() {
    let selected = load_pvpc_holidays(&ComputedHolidayProvider, 2025)
        .await
        .unwrap();
    let mut cache = HolidayCache::new();
    cache.store_refresh(2025, &selected);

    // A failed 2026 load falls back to the provisional January days.
    let provisional = provisional_january_holidays(2026);
    cache.store_provisional(2026, &provisional);

    assert!(cache.is_holiday(day(2025, 12, 25)));
    assert!(cache.is_year_provisional(2026));
    assert!(!cache.is_year_refreshed(2026));

    // The eventual full load replaces the provisional marker.
    let next = load_pvpc_holidays(&ComputedHolidayProvider, 2026)
        .await
        .unwrap();
    cache.store_refresh(2026, &next);
    assert!(cache.is_year_refreshed(2026));
    assert!(!cache.is_year_provisional(2026));
    assert!(cache.is_holiday(day(2025, 12, 25)));
}

#[test]
fn cache_roundtrips_through_serde() {
    let mut cache = HolidayCache::new();
    let mut selected = std::collections::BTreeMap::new();
    selected.insert(day(2025, 5, 1), "Fiesta del Trabajo".to_string());
    selected.insert(day(2025, 12, 25), "Natividad del Señor".to_string());
    cache.store_refresh(2025, &selected);
    cache.store_provisional(2026, &provisional_january_holidays(2026));

    let json = serde_json::to_string(&cache).unwrap();
    let restored: HolidayCache = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, cache);
    assert!(restored.is_holiday(day(2025, 5, 1)));
    assert!(restored.is_year_provisional(2026));
}
