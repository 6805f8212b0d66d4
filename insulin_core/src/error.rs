use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("pump command failed: {0}")]
    PumpCommand(String),
    #[error("pump communication timed out")]
    PumpTimeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("loop service stopped")]
    ServiceStopped,
    #[error("timed out waiting for loop cycle")]
    CycleTimeout,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to persist {what}: {source}")]
    Persist {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load {what}: {reason}")]
    Load { what: &'static str, reason: String },
    #[error("invalid dose entry {sync_id}: {reason}")]
    InvalidDose { sync_id: String, reason: &'static str },
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing loop settings")]
    MissingSettings,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
