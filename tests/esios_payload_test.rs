use chrono::{Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Europe::Madrid;
use tarifa::TarifaError;
use tarifa::esios::{parse_archive_payload, parse_indicator_payload};
use tarifa::periods::TariffZone;
use tarifa::series::{PriceSeries, hours_in_local_day, local_midnight_utc};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// Archive rows as the public endpoint sends them: local hour order, comma
// decimals, EUR/MWh. PCB runs 100..,00 and CYM 200..,00 per hour.
fn archive_json(day: NaiveDate, hours: i64) -> String {
    let dia = day.format("%d/%m/%Y");
    let rows: Vec<String> = (0..hours)
        .map(|h| {
            format!(
                r#"{{"Dia":"{dia}","Hora":"{:02}-{:02}","PCB":"{},00","CYM":"{},00"}}"#,
                h,
                h + 1,
                100 + h,
                200 + h
            )
        })
        .collect();
    format!(r#"{{"PVPC":[{}]}}"#, rows.join(","))
}

fn indicator_json(rows: &[String]) -> String {
    format!(r#"{{"indicator":{{"values":[{}]}}}}"#, rows.join(","))
}

fn indicator_rows(day: NaiveDate, geo: Option<u32>) -> Vec<String> {
    let midnight = local_midnight_utc(day, Madrid);
    (0..hours_in_local_day(day, Madrid))
        .map(|h| {
            let geo = geo.map_or(String::new(), |id| format!(r#","geo_id":{id}"#));
            format!(
                r#"{{"value":{}.0,"datetime":"{}"{geo}}}"#,
                100 + h,
                (midnight + Duration::hours(h)).to_rfc3339()
            )
        })
        .collect()
}

#[test]
fn spring_archive_day_has_twenty_three_hours() {
    let spring = date(2025, 3, 30);
    assert_eq!(hours_in_local_day(spring, Madrid), 23);

    let prices =
        parse_archive_payload(&archive_json(spring, 23), spring, TariffZone::Peninsula, Madrid)
            .unwrap();
    assert_eq!(prices.len(), 23);
    // Row index 2 lands after the skipped 02:00 and reads 03:00 local.
    assert_eq!(prices[2].ts.with_timezone(&Madrid).hour(), 3);

    let full =
        parse_archive_payload(&archive_json(spring, 24), spring, TariffZone::Peninsula, Madrid);
    assert!(full.is_err());
}

#[test]
fn autumn_indicator_day_covers_twenty_five_hours() {
    let autumn = date(2025, 10, 26);
    let json = indicator_json(&indicator_rows(autumn, Some(8741)));

    let prices = parse_indicator_payload(&json, autumn, TariffZone::Peninsula, Madrid).unwrap();
    assert_eq!(prices.len(), 25);
    assert_eq!(prices[0].ts, local_midnight_utc(autumn, Madrid));
    // The repeated local 02:00 keeps both hourly values.
    assert_eq!(prices[2].ts.with_timezone(&Madrid).hour(), 2);
    assert_eq!(prices[3].ts.with_timezone(&Madrid).hour(), 2);
    assert!((prices[3].price - 0.103).abs() < 1e-9);
}

#[test]
fn price_spikes_keep_thousands_separators_apart() {
    let day = date(2025, 6, 2);
    let json = archive_json(day, 24).replace(r#""PCB":"100,00""#, r#""PCB":"1.234,56""#);

    let prices = parse_archive_payload(&json, day, TariffZone::Peninsula, Madrid).unwrap();
    assert!((prices[0].price - 1.23456).abs() < 1e-9);
}

#[test]
fn archive_rows_from_another_day_are_rejected() {
    let day = date(2025, 6, 2);
    let json = archive_json(day, 24).replacen("02/06/2025", "03/06/2025", 1);

    let err = parse_archive_payload(&json, day, TariffZone::Peninsula, Madrid).unwrap_err();
    assert!(matches!(err, TarifaError::PriceData { .. }));
}

#[test]
fn ceuta_melilla_requires_its_own_column() {
    let day = date(2025, 6, 2);
    let json = archive_json(day, 24).replace(r#","CYM":"200,00""#, "");

    let err = parse_archive_payload(&json, day, TariffZone::CeutaMelilla, Madrid).unwrap_err();
    assert!(err.to_string().contains("ceuta_melilla"));
}

#[test]
fn duplicate_indicator_values_keep_the_first() {
    let day = date(2025, 6, 2);
    let mut rows = indicator_rows(day, Some(8741));
    let five = local_midnight_utc(day, Madrid) + Duration::hours(5);
    rows.push(format!(
        r#"{{"value":999.0,"datetime":"{}","geo_id":8741}}"#,
        five.to_rfc3339()
    ));

    let prices =
        parse_indicator_payload(&indicator_json(&rows), day, TariffZone::Peninsula, Madrid)
            .unwrap();
    assert_eq!(prices.len(), 24);
    assert!((prices[5].price - 0.105).abs() < 1e-9);
}

#[test]
fn national_indicator_values_pass_unfiltered() {
    // MAG and OMIE values carry the national geo id, not a zone one.
    let day = date(2025, 6, 2);
    let json = indicator_json(&indicator_rows(day, Some(3)));

    let prices = parse_indicator_payload(&json, day, TariffZone::Peninsula, Madrid).unwrap();
    assert_eq!(prices.len(), 24);
}

#[test]
fn indicator_day_must_start_at_local_midnight() {
    let day = date(2025, 6, 2);
    let midnight = local_midnight_utc(day, Madrid);
    // 24 hourly values shifted one hour late: the count matches, the start
    // does not.
    let rows: Vec<String> = (1..=24)
        .map(|h| {
            format!(
                r#"{{"value":100.0,"datetime":"{}","geo_id":8741}}"#,
                (midnight + Duration::hours(h)).to_rfc3339()
            )
        })
        .collect();

    let err = parse_indicator_payload(&indicator_json(&rows), day, TariffZone::Peninsula, Madrid)
        .unwrap_err();
    assert!(matches!(err, TarifaError::PriceData { .. }));
}

#[test]
fn parsed_days_chain_into_a_two_day_series() {
    let today = date(2025, 6, 2);
    let tomorrow = date(2025, 6, 3);
    let mut prices =
        parse_archive_payload(&archive_json(today, 24), today, TariffZone::Peninsula, Madrid)
            .unwrap();
    prices.extend(
        parse_archive_payload(
            &archive_json(tomorrow, 24),
            tomorrow,
            TariffZone::Peninsula,
            Madrid,
        )
        .unwrap(),
    );

    let series = PriceSeries::new(prices, Madrid).unwrap();
    assert_eq!(series.covered_dates(), vec![today, tomorrow]);
    let noon = Madrid
        .with_ymd_and_hms(2025, 6, 3, 12, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    assert!((series.price_at(noon).unwrap() - 0.112).abs() < 1e-9);
}
