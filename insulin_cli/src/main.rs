#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod iob;
mod simulate;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use insulin_core::LoopSettings;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::cli::{Cli, CliLimits, Commands, FILE_GUARD, JSON_MODE, LAST_LIMITS};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::simulate::SimulateArgs;

fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let _ = JSON_MODE.set(json);

    if let Err(err) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::debug!(error = ?err, "command failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    color_eyre::install()?;

    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let settings = LoopSettings::try_from(&cfg).wrap_err("invalid config")?;
    insulin_core::builder::validate_settings(&settings)?;
    let _ = LAST_LIMITS.set(CliLimits {
        target_mg_dl: settings.target_mg_dl,
        shutoff_mg_dl: settings.shutoff_mg_dl,
        max_basal_rate: settings.max_basal_rate,
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Simulate {
            hours,
            start_glucose,
            meal,
            exercise,
            noise,
            seed,
            persist,
            cycles,
        } => {
            let args = SimulateArgs {
                hours,
                start_glucose,
                meals: meal,
                exercise,
                noise,
                seed,
                persist,
            };
            let summary = simulate::run_simulate(&cfg, Arc::new(settings), args, shutdown)?;
            if cli.json {
                if cycles {
                    for c in &summary.cycles {
                        println!("{}", serde_json::to_string(c)?);
                    }
                }
                println!("{}", simulate::summary_json(&summary));
            } else {
                if cycles {
                    for c in &summary.cycles {
                        println!(
                            "{}  {:>5.0} mg/dL  {:<15} temp={} bolus={} iob={}",
                            c.at.format("%H:%M"),
                            c.glucose,
                            c.outcome,
                            fmt_opt(c.temp_basal),
                            fmt_opt(c.micro_bolus),
                            fmt_opt(c.iob),
                        );
                    }
                }
                println!("{}", simulate::render_summary(&summary));
            }
        }
        Commands::Iob {
            ledger,
            at,
            window_hours,
        } => {
            let path = ledger
                .or_else(|| cfg.storage.dose_ledger.clone())
                .ok_or_else(|| eyre::eyre!("no dose ledger: pass --ledger or set storage.dose_ledger"))?;
            let at = iob::parse_at(at.as_deref())?;
            let report = iob::run_iob(&path, &settings, at, window_hours)?;
            if cli.json {
                println!("{}", report.to_json());
            } else {
                println!("{}", report.render());
            }
        }
        Commands::SelfCheck => {
            self_check(&cfg, &settings)?;
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok" }));
            } else {
                println!("OK");
            }
        }
        Commands::Health => {
            let health = serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "closed_loop": settings.closed_loop,
                "ml_controller": settings.use_ml_controller,
                "micro_bolus": settings.micro_bolus.enabled,
            });
            if cli.json {
                println!("{health}");
            } else {
                println!(
                    "healthy (closed_loop={}, ml_controller={})",
                    settings.closed_loop, settings.use_ml_controller
                );
            }
        }
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.2}"))
}

fn load_config(path: &Path) -> Result<insulin_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = insulin_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid config")?;
    Ok(cfg)
}

/// Everything a loop start would touch, without running a cycle.
fn self_check(cfg: &insulin_config::Config, settings: &LoopSettings) -> Result<()> {
    if cfg.ml.controller == insulin_config::MlControllerKind::LinearModel
        && let Some(path) = &cfg.ml.model_path
    {
        insulin_core::ml::LinearModel::load(path)?;
        tracing::info!(path = %path.display(), "model artifact ok");
    }
    if let Some(path) = &cfg.storage.dose_ledger {
        let ledger = insulin_core::DoseLedger::open(path, settings)
            .wrap_err_with(|| format!("open dose ledger {}", path.display()))?;
        tracing::info!(events = ledger.events().len(), "dose ledger ok");
    }
    if let Some(path) = &cfg.storage.safety_ledger {
        let arbiter = insulin_core::SafetyArbiter::open(path, settings)
            .wrap_err_with(|| format!("open safety ledger {}", path.display()))?;
        tracing::info!(entries = arbiter.entries().len(), "safety ledger ok");
    }
    Ok(())
}

fn init_tracing(json: bool, level: &str, logging: &insulin_config::Logging) -> Result<()> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("invalid --log-level '{level}'"))?,
    };
    // Console logs go to stderr so stdout stays machine-readable.
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file '{file}' has no file name"))?;
            let rotation = match logging.rotation.as_deref() {
                None | Some("never") => Rotation::NEVER,
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                Some(other) => eyre::bail!("logging.rotation must be never|daily|hourly, got '{other}'"),
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(name.to_string_lossy().into_owned())
                .build(dir)
                .wrap_err_with(|| format!("open log file {file}"))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_level = logging.level.as_deref().unwrap_or("info");
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_filter(EnvFilter::try_new(file_level)?),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("init logging")?;
    Ok(())
}
