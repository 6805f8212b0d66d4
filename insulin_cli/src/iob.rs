//! Insulin on board from a persisted dose ledger.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use eyre::WrapErr;
use insulin_core::{DoseLedger, LoopSettings};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct IobReport {
    pub at: DateTime<Utc>,
    pub iob: f64,
    pub delivered: f64,
    pub window_hours: f64,
    pub events: usize,
}

pub fn parse_at(at: Option<&str>) -> eyre::Result<DateTime<Utc>> {
    match at {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .wrap_err_with(|| format!("--at '{s}' is not an RFC 3339 time")),
    }
}

pub fn run_iob(
    path: &Path,
    settings: &LoopSettings,
    at: DateTime<Utc>,
    window_hours: f64,
) -> eyre::Result<IobReport> {
    if !(window_hours > 0.0 && window_hours.is_finite()) {
        eyre::bail!("iob --window-hours must be > 0");
    }
    if !path.exists() {
        eyre::bail!("dose ledger {} does not exist", path.display());
    }
    let ledger = DoseLedger::open(path, settings)
        .wrap_err_with(|| format!("open dose ledger {}", path.display()))?;
    let window = Duration::milliseconds((window_hours * 3_600_000.0).round() as i64);
    let report = IobReport {
        at,
        iob: ledger.insulin_on_board(at),
        delivered: ledger.insulin_delivered(at - window, at),
        window_hours,
        events: ledger.events().len(),
    };
    tracing::debug!(?report, "iob computed");
    Ok(report)
}

impl IobReport {
    pub fn render(&self) -> String {
        format!(
            "IOB at {}: {:.3} U\nDelivered in last {} h: {:.3} U\nLedger events: {}",
            self.at.to_rfc3339(),
            self.iob,
            self.window_hours,
            self.delivered,
            self.events,
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "at": self.at.to_rfc3339(),
            "iob_u": self.iob,
            "delivered_u": self.delivered,
            "window_hours": self.window_hours,
            "events": self.events,
        })
    }
}
