//! Background loop service.
//!
//! Spawns one thread that owns the `LoopOrchestrator` and serves commands
//! from an unbounded channel in arrival order, so glucose readings and pump
//! events sent before a cycle request are visible to that cycle and no two
//! cycles ever overlap.
//!
//! The thread is shut down and joined when the `LoopService` is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel as xch;
use insulin_traits::GlucoseSample;

use crate::config::LoopSettings;
use crate::error::LoopError;
use crate::ledger::PumpEvent;
use crate::orchestrator::LoopOrchestrator;
use crate::status::{LoopOutcome, Trigger};

/// How often an idle worker re-checks the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

enum Command {
    RecordGlucose(Vec<GlucoseSample>),
    AddPumpEvents {
        events: Vec<PumpEvent>,
        last_sync: DateTime<Utc>,
    },
    RunCycle {
        trigger: Trigger,
        reply: xch::Sender<Option<LoopOutcome>>,
    },
    UpdateSettings(Arc<LoopSettings>),
    Shutdown,
}

pub struct LoopService {
    tx: xch::Sender<Command>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl LoopService {
    pub fn spawn(mut orchestrator: LoopOrchestrator) -> Self {
        let (tx, rx) = xch::unbounded::<Command>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("loop service received shutdown signal");
                    break;
                }
                let cmd = match rx.recv_timeout(IDLE_POLL) {
                    Ok(cmd) => cmd,
                    Err(xch::RecvTimeoutError::Timeout) => continue,
                    Err(xch::RecvTimeoutError::Disconnected) => {
                        tracing::debug!("loop service handle dropped, exiting thread");
                        break;
                    }
                };
                match cmd {
                    Command::RecordGlucose(samples) => orchestrator.record_glucose(samples),
                    Command::AddPumpEvents { events, last_sync } => {
                        if let Err(e) = orchestrator.add_pump_events(events, last_sync) {
                            tracing::warn!(error = %e, "pump events not fully applied");
                        }
                    }
                    Command::RunCycle { trigger, reply } => {
                        let outcome = orchestrator.run_cycle(trigger);
                        // Caller may have given up waiting
                        let _ = reply.send(outcome);
                    }
                    Command::UpdateSettings(settings) => {
                        if let Err(e) = orchestrator.update_settings(settings) {
                            tracing::warn!(error = %e, "settings update rejected");
                        }
                    }
                    Command::Shutdown => break,
                }
            }
            tracing::trace!("loop service thread exiting cleanly");
        });

        Self {
            tx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    fn send(&self, cmd: Command) -> Result<(), LoopError> {
        self.tx.send(cmd).map_err(|_| LoopError::ServiceStopped)
    }

    pub fn record_glucose(&self, samples: Vec<GlucoseSample>) -> Result<(), LoopError> {
        self.send(Command::RecordGlucose(samples))
    }

    pub fn add_pump_events(
        &self,
        events: Vec<PumpEvent>,
        last_sync: DateTime<Utc>,
    ) -> Result<(), LoopError> {
        self.send(Command::AddPumpEvents { events, last_sync })
    }

    pub fn update_settings(&self, settings: Arc<LoopSettings>) -> Result<(), LoopError> {
        self.send(Command::UpdateSettings(settings))
    }

    /// Queue a cycle; the outcome arrives on the returned channel.
    pub fn run_cycle(
        &self,
        trigger: Trigger,
    ) -> Result<xch::Receiver<Option<LoopOutcome>>, LoopError> {
        let (reply, rx) = xch::bounded(1);
        self.send(Command::RunCycle { trigger, reply })?;
        Ok(rx)
    }

    /// Queue a cycle and block until it completes or `timeout` elapses.
    /// `Ok(None)` means the cycle was gated by the minimum loop interval.
    pub fn trigger_and_wait(
        &self,
        trigger: Trigger,
        timeout: Duration,
    ) -> Result<Option<LoopOutcome>, LoopError> {
        let rx = self.run_cycle(trigger)?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            xch::RecvTimeoutError::Timeout => LoopError::CycleTimeout,
            xch::RecvTimeoutError::Disconnected => LoopError::ServiceStopped,
        })
    }
}

impl Drop for LoopService {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("loop service thread joined"),
                Err(e) => tracing::warn!(?e, "loop service thread panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingPump;
    use chrono::TimeZone;
    use insulin_traits::Clock;
    use insulin_traits::test_clock::TestClock;

    #[test]
    fn gated_cycle_and_shutdown() {
        let clock = TestClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let now = clock.now();
        let pump = RecordingPump::synced_at(now);
        let orchestrator = LoopOrchestrator::builder()
            .with_settings(Arc::new(LoopSettings::default()))
            .with_clock(clock)
            .with_pump(pump.clone())
            .build()
            .unwrap();
        let service = LoopService::spawn(orchestrator);
        service
            .record_glucose(vec![GlucoseSample::new(now, 120.0)])
            .unwrap();
        let first = service
            .trigger_and_wait(Trigger::GlucoseReading, Duration::from_secs(5))
            .unwrap();
        assert!(matches!(first, Some(LoopOutcome::DoseSet(_))));
        let second = service
            .trigger_and_wait(Trigger::PumpHeartbeat, Duration::from_secs(5))
            .unwrap();
        assert!(second.is_none());
        drop(service);
        assert_eq!(pump.commands().len(), 1);
    }
}
