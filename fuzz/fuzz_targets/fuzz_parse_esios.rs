#![no_main]
use chrono::NaiveDate;
use chrono_tz::Europe::Madrid;
use libfuzzer_sys::fuzz_target;
use tarifa::esios::{parse_archive_payload, parse_indicator_payload};
use tarifa::periods::TariffZone;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Some(day) = NaiveDate::from_ymd_opt(2025, 6, 2) else {
        return;
    };

    // Exercise both payload shapes against both tariff zones
    let _ = parse_archive_payload(text, day, TariffZone::Peninsula, Madrid);
    let _ = parse_archive_payload(text, day, TariffZone::CeutaMelilla, Madrid);
    let _ = parse_indicator_payload(text, day, TariffZone::Peninsula, Madrid);
    let _ = parse_indicator_payload(text, day, TariffZone::CeutaMelilla, Madrid);
});
