//! Maps `Box<dyn Error>` from the pump trait boundary to typed `LoopError`.
//!
//! `insulin_traits::PumpManager` returns boxed errors so vendor integrations
//! can surface their own types; the orchestrator only needs to know whether
//! the command timed out or was rejected.

use crate::error::LoopError;

/// Map a trait-boundary error to a typed `LoopError`.
///
/// Known error types are matched first, then string heuristics apply.
pub fn map_pump_error(e: &(dyn std::error::Error + 'static)) -> LoopError {
    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && io.kind() == std::io::ErrorKind::TimedOut
    {
        return LoopError::PumpTimeout;
    }
    if let Some(le) = e.downcast_ref::<LoopError>() {
        return le.clone();
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        LoopError::PumpTimeout
    } else {
        LoopError::PumpCommand(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_maps_to_timeout() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "radio");
        assert!(matches!(map_pump_error(&e), LoopError::PumpTimeout));
    }

    #[test]
    fn other_errors_keep_their_message() {
        let e = std::io::Error::other("occlusion detected");
        match map_pump_error(&e) {
            LoopError::PumpCommand(msg) => assert!(msg.contains("occlusion")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timeout_text_is_detected() {
        let e = std::io::Error::other("RileyLink response timeout");
        assert!(matches!(map_pump_error(&e), LoopError::PumpTimeout));
    }
}
