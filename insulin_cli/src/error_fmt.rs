//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_LIMITS;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use insulin_core::error::{BuildError, LedgerError, LoopError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSettings => {
                "What happened: The dosing loop was built without settings.\nLikely causes: The config was not converted before building the loop.\nHow to fix: Load the config and pass it via with_settings(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range targets, schedule or safety values in the TOML.\nHow to fix: Edit the config file, then rerun `insulin self-check`."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LoopError>() {
        return match le {
            LoopError::PumpCommand(msg) => format!(
                "What happened: The pump rejected a command ({msg}).\nLikely causes: Occlusion, empty reservoir or a suspended pump.\nHow to fix: Check the pump, then let the next cycle retry."
            ),
            LoopError::PumpTimeout => "What happened: Pump communication timed out.\nLikely causes: Pump out of radio range or a weak link.\nHow to fix: Move the controller closer to the pump; the loop retries on the next cycle.".to_string(),
            LoopError::ServiceStopped | LoopError::CycleTimeout => format!(
                "What happened: {le}.\nLikely causes: The loop worker stopped or a cycle took too long.\nHow to fix: Re-run with --log-level=debug to see the last cycle."
            ),
            LoopError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LedgerError>() {
        return match le {
            LedgerError::Persist { what, .. } => format!(
                "What happened: Could not write the {what}.\nLikely causes: Missing permissions or a full disk at the [storage] path.\nHow to fix: Check the directory in [storage]; doses stay in memory until the next successful write."
            ),
            LedgerError::Load { what, reason } => format!(
                "What happened: Could not read the {what} ({reason}).\nLikely causes: The file is corrupt or was written by another tool.\nHow to fix: Move the file aside and let the loop start a fresh ledger."
            ),
            LedgerError::InvalidDose { sync_id, reason } => format!(
                "What happened: Pump history entry {sync_id} was rejected ({reason}).\nLikely causes: Corrupt pump history.\nHow to fix: Resync the pump history."
            ),
        };
    }

    if err.downcast_ref::<toml::de::Error>().is_some() {
        return format!(
            "What happened: The config file is not valid TOML for this tool.\nLikely causes: Missing [targets] or [schedule] sections, a typo in a key, or a wrong value type.\nHow to fix: Compare with etc/insulin_config.toml. Parser said: {}",
            root_message(err)
        );
    }

    // String-based heuristics for errors coming from config validation
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config <FILE> pointing at a readable TOML file. Original: {msg}"
        );
    }

    if lower.contains("must be") || lower.contains("must have") || lower.contains("is required") {
        return format!(
            "What happened: Configuration is invalid ({}).\nLikely causes: Out-of-range value or a schedule with the wrong number of entries.\nHow to fix: Edit the TOML config and try again.",
            root_message(err)
        );
    }

    if lower.contains("schedule csv") || lower.contains("headers") {
        return "Invalid schedule CSV. Expected headers 'bucket,basal_rate,insulin_sensitivity' and one row per bucket.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn root_message(err: &eyre::Report) -> String {
    err.root_cause().to_string().trim().to_string()
}

/// Stable exit codes per error family; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use insulin_core::error::{BuildError, LedgerError, LoopError};
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if let Some(le) = err.downcast_ref::<LoopError>() {
        return match le {
            LoopError::PumpCommand(_) => 3,
            LoopError::PumpTimeout => 4,
            LoopError::ServiceStopped | LoopError::CycleTimeout => 5,
            LoopError::Config(_) => 2,
        };
    }
    if err.downcast_ref::<LedgerError>().is_some() {
        return 6;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    use insulin_core::error::{BuildError, LedgerError, LoopError};
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    if let Some(le) = err.downcast_ref::<LoopError>() {
        return match le {
            LoopError::PumpCommand(_) => "PumpCommand",
            LoopError::PumpTimeout => "PumpTimeout",
            LoopError::ServiceStopped => "ServiceStopped",
            LoopError::CycleTimeout => "CycleTimeout",
            LoopError::Config(_) => "InvalidConfig",
        };
    }
    if let Some(le) = err.downcast_ref::<LedgerError>() {
        return match le {
            LedgerError::Persist { .. } => "LedgerPersist",
            LedgerError::Load { .. } => "LedgerLoad",
            LedgerError::InvalidDose { .. } => "InvalidDose",
        };
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = reason_name(err);
    let msg = humanize(err);
    let details = match reason {
        "InvalidConfig" | "PumpCommand" | "PumpTimeout" => LAST_LIMITS.get().map(|l| {
            json!({
                "target_mg_dl": l.target_mg_dl,
                "shutoff_mg_dl": l.shutoff_mg_dl,
                "max_basal_rate": l.max_basal_rate,
            })
        }),
        _ => None,
    };
    match details {
        Some(d) => json!({ "reason": reason, "details": d, "message": msg }).to_string(),
        None => json!({ "reason": reason, "message": msg }).to_string(),
    }
}
