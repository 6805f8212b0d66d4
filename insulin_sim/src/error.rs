use thiserror::Error;

/// Faults the simulated pump can be told to raise.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    #[error("occlusion detected")]
    Occlusion,
    #[error("pump communication timeout")]
    Timeout,
    #[error("reservoir empty")]
    ReservoirEmpty,
}

pub type Result<T> = std::result::Result<T, SimFault>;
