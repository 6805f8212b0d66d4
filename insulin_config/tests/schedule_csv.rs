use std::fs::File;
use std::io::Write;

use insulin_config::{load_schedule_csv, load_toml};
use rstest::rstest;
use tempfile::tempdir;

fn write_csv(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("schedule.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[rstest]
fn loads_six_bucket_schedule_in_any_order() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "bucket,basal_rate,insulin_sensitivity\n5,0.9,55\n0,0.8,60\n1,1.2,40\n2,1.0,45\n3,1.0,50\n4,0.95,50\n",
    );
    let s = load_schedule_csv(&path).unwrap();
    assert!((s.basal_rates[0] - 0.8).abs() < 1e-12);
    assert!((s.basal_rates[1] - 1.2).abs() < 1e-12);
    assert!((s.insulin_sensitivity[5] - 55.0).abs() < 1e-12);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "hour,rate,isf\n0,1,50\n");
    let err = load_schedule_csv(&path).expect_err("headers");
    assert!(format!("{err}").contains("must have headers"));
}

#[rstest]
fn rejects_missing_bucket() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "bucket,basal_rate,insulin_sensitivity\n0,1,50\n1,1,50\n2,1,50\n3,1,50\n4,1,50\n",
    );
    let err = load_schedule_csv(&path).expect_err("five rows");
    assert!(format!("{err}").contains("exactly 6 rows"));
}

#[rstest]
fn rejects_non_numeric_row_with_line_number() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "bucket,basal_rate,insulin_sensitivity\n0,1,50\n1,fast,50\n",
    );
    let err = load_schedule_csv(&path).expect_err("bad row");
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[rstest]
fn csv_path_in_config_overrides_inline_arrays() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "bucket,basal_rate,insulin_sensitivity\n0,2,30\n1,2,30\n2,2,30\n3,2,30\n4,2,30\n5,2,30\n",
    );
    let toml = format!(
        r#"
[targets]
target_mg_dl = 110
shutoff_mg_dl = 80
max_basal_rate = 4.0

[schedule]
csv = "{}"
"#,
        path.display().to_string().replace('\\', "/")
    );
    let cfg = load_toml(&toml).unwrap();
    cfg.validate().unwrap();
    let s = cfg.schedule().unwrap();
    assert!(s.basal_rates.iter().all(|r| (*r - 2.0).abs() < 1e-12));
}
