use insulin_config::{MlControllerKind, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[targets]
target_mg_dl = 100
shutoff_mg_dl = 75
max_basal_rate = 3.0

[schedule]
basal_rates = [0.8, 1.0, 1.1, 0.9, 1.0, 0.9]
insulin_sensitivity = [55, 45, 50, 50, 50, 55]
"#;

#[test]
fn minimal_config_uses_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!(cfg.loop_cfg.closed_loop);
    assert!((cfg.loop_cfg.min_loop_interval_min - 4.2).abs() < 1e-12);
    assert!((cfg.safety.horizon_hours - 3.0).abs() < 1e-12);
    assert!((cfg.safety.biological_invariant_threshold + 35.0).abs() < 1e-12);
    assert!((cfg.micro_bolus.min_units - 0.025).abs() < 1e-12);
    assert_eq!(cfg.ml.controller, MlControllerKind::None);
    let schedule = cfg.schedule().unwrap();
    assert!((schedule.basal_rates[2] - 1.1).abs() < 1e-12);
}

#[test]
fn missing_targets_section_fails_to_parse() {
    let toml = r#"
[schedule]
basal_rates = [1, 1, 1, 1, 1, 1]
insulin_sensitivity = [50, 50, 50, 50, 50, 50]
"#;
    assert!(load_toml(toml).is_err());
}

#[rstest]
#[case("[loop]\nglucose_freshness_min = 0.0\n", "loop.glucose_freshness_min")]
#[case("[loop]\ntemp_basal_duration_min = 2.0\n", "loop.temp_basal_duration_min")]
#[case("[pid]\nkp = -1.0\n", "pid.kp")]
#[case("[micro_bolus]\nfraction = 1.5\n", "micro_bolus.fraction")]
#[case("[safety]\nbiological_invariant_threshold = 10.0\n", "safety.biological_invariant_threshold")]
#[case("[safety]\nledger_retention_hours = 1.0\n", "safety.ledger_retention_hours")]
#[case("[safety]\nbiological_invariant_threshold = nan\n", "safety.biological_invariant_threshold")]
#[case("[safety]\nledger_retention_hours = nan\n", "safety.ledger_retention_hours")]
#[case("[safety]\ndigestion_threshold = nan\n", "safety.digestion_threshold")]
#[case("[micro_bolus]\nmin_interval_min = nan\n", "micro_bolus.min_interval_min")]
#[case("[micro_bolus]\nglucose_margin_mg_dl = nan\n", "micro_bolus.glucose_margin_mg_dl")]
#[case("[frame]\nrows = 3\n", "frame.rows")]
#[case("[frame]\nmax_edge_gap_min = nan\n", "frame.max_edge_gap_min")]
#[case("[ml]\nlow_lookback_min = nan\n", "ml.low_lookback_min")]
#[case("[ml]\nlow_lookback_min = 1e12\n", "ml.low_lookback_min")]
#[case("[ml]\ncontroller = \"linear_model\"\n", "ml.model_path")]
fn rejects_out_of_range_sections(#[case] extra: &str, #[case] needle: &str) {
    let toml = format!("{BASE}\n{extra}");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn rejects_shutoff_above_target() {
    let toml = BASE.replace("shutoff_mg_dl = 75", "shutoff_mg_dl = 120");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("shutoff above target");
    assert!(format!("{err}").contains("targets.shutoff_mg_dl"));
}

#[test]
fn rejects_short_schedule_arrays() {
    let toml = BASE.replace(
        "basal_rates = [0.8, 1.0, 1.1, 0.9, 1.0, 0.9]",
        "basal_rates = [0.8, 1.0]",
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("short schedule");
    assert!(format!("{err}").contains("schedule.basal_rates"));
}

#[test]
fn unknown_insulin_kind_is_a_parse_error() {
    let toml = format!("{BASE}\n[insulin]\nkind = \"nph\"\n");
    assert!(load_toml(&toml).is_err());
}

#[test]
fn shipped_sample_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../etc/insulin_config.toml");
    let text = std::fs::read_to_string(&path).expect("read sample config");
    let cfg = load_toml(&text).expect("parse sample config");
    cfg.validate().expect("sample config should validate");
    assert_eq!(cfg.logging.rotation.as_deref(), Some("never"));
}
