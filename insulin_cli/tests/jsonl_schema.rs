use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[targets]
target_mg_dl = 100
shutoff_mg_dl = 75
max_basal_rate = 3.0

[schedule]
basal_rates = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
insulin_sensitivity = [50, 50, 50, 50, 50, 50]
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(bytes: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("valid JSON"))
        .collect()
}

/// One JSON object per cycle, then the summary.
#[rstest]
fn simulate_jsonl_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("insulin_cli").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(["simulate", "--hours", "1", "--cycles"]);

    let out = cmd.assert().success().get_output().stdout.clone();
    let lines = json_lines(&out);
    assert_eq!(lines.len(), 13, "stdout: {}", String::from_utf8_lossy(&out));

    for cycle in &lines[..12] {
        assert!(cycle.get("at").and_then(|x| x.as_str()).is_some());
        assert!(cycle.get("glucose").and_then(|x| x.as_f64()).is_some());
        assert!(cycle.get("outcome").and_then(|x| x.as_str()).is_some());
        // Either number or null
        for key in ["temp_basal", "micro_bolus", "iob"] {
            let ok = match cycle.get(key) {
                Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::Number(n)) => n.as_f64().is_some(),
                _ => false,
            };
            assert!(ok, "{key} should be number or null");
        }
        assert!(cycle
            .get("biological_invariant_violation")
            .and_then(|x| x.as_bool())
            .is_some());
    }

    let summary = &lines[12];
    assert_eq!(summary["cycles"], 12);
    assert!(summary["outcomes"].is_object());
    assert!(summary["time_in_range_pct"].as_f64().is_some());
    assert!(summary["insulin_delivered"].as_f64().is_some_and(|u| u > 0.0));
}

#[rstest]
fn health_json_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("insulin_cli")
        .unwrap()
        .arg("--json")
        .arg("--config")
        .arg(&cfg)
        .arg("health")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status"], "ok");
    assert_eq!(lines[0]["closed_loop"], true);
    assert!(lines[0]["version"].as_str().is_some());
}

/// Errors in JSON mode are a single object on stderr with a stable reason.
#[rstest]
fn error_json_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let ledger = dir.path().join("doses.json");
    fs::write(&ledger, "[1, 2").unwrap();

    let out = Command::cargo_bin("insulin_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("iob")
        .arg("--ledger")
        .arg(&ledger)
        .assert()
        .code(6)
        .get_output()
        .stderr
        .clone();
    let lines = json_lines(&out);
    let err = lines
        .iter()
        .find(|v| v.get("reason").is_some())
        .expect("error object on stderr");
    assert_eq!(err["reason"], "LedgerLoad");
    assert!(err["message"].as_str().is_some_and(|m| m.starts_with("What happened")));
}
