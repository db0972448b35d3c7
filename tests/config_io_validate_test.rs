use std::fs;
use tarifa::config::{Config, FastCadence};
use tarifa::levels::BetterPriceTarget;
use tarifa::periods::TariffZone;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.zone = TariffZone::CeutaMelilla;
    cfg.power.p1_kw = 5.75;
    cfg.better_price_target = BetterPriceTarget::Cheap;
    cfg.fast_cadence = FastCadence::Hourly;

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.zone, TariffZone::CeutaMelilla);
    assert_eq!(loaded.power.p1_kw, 5.75);
    assert_eq!(loaded.better_price_target, BetterPriceTarget::Cheap);
    assert_eq!(loaded.fast_cadence, FastCadence::Hourly);
}

#[test]
fn config_validation_errors() {
    // Contracted power outside the regulated band
    let mut cfg = Config::default();
    cfg.power.p1_kw = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.power.p3_kw = 16.0;
    assert!(cfg.validate().is_err());

    // Refresh interval zero
    cfg = Config::default();
    cfg.refresh.price_interval_minutes = 0;
    assert!(cfg.validate().is_err());

    // Token mode enabled without a token
    cfg = Config::default();
    cfg.esios.use_api_token = true;
    cfg.esios.api_token = "  ".to_string();
    assert!(cfg.validate().is_err());

    // Unknown timezone
    cfg = Config::default();
    cfg.timezone = "Mars/Olympus_Mons".to_string();
    assert!(cfg.validate().is_err());

    // Empty dataset URL
    cfg = Config::default();
    cfg.holidays.dataset_url.clear();
    assert!(cfg.validate().is_err());
}

#[test]
fn defaults_pass_validation() {
    assert!(Config::default().validate().is_ok());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
