//! Property tests for guardrails, dose selection and the arbiter envelope.

use chrono::{DateTime, Duration, TimeZone, Utc};
use insulin_core::dose_selection::{SelectionInput, apply_guardrails, select_dose};
use insulin_core::mocks::RecordingPump;
use insulin_core::{LoopSettings, SafetyArbiter, SafetyLedgerEntry};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 4, 0, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn guarded_rate_stays_within_limits(
        rate in -10.0f64..20.0,
        glucose in 40.0f64..400.0,
        predicted in prop::option::of(40.0f64..400.0),
    ) {
        let s = LoopSettings::default();
        let pump = RecordingPump::default();
        let out = apply_guardrails(rate, &s, &pump, glucose, predicted);
        prop_assert!((0.0..=s.max_basal_rate).contains(&out));
        if glucose <= s.shutoff_mg_dl || predicted.is_some_and(|p| p <= s.shutoff_mg_dl) {
            prop_assert_eq!(out, 0.0);
        }
    }

    #[test]
    fn selection_never_combines_temp_basal_and_micro_bolus(
        temp_basal in 0.0f64..3.0,
        micro_bolus in 0.0f64..2.0,
        invariant in prop::option::of(-100.0f64..100.0),
        exercising in any::<bool>(),
    ) {
        let s = LoopSettings::default();
        let d = select_dose(
            &SelectionInput { temp_basal, micro_bolus, biological_invariant: invariant, exercising, safety_result: None },
            &s,
        );
        prop_assert!(!(d.temp_basal > 0.0 && d.micro_bolus > 0.0), "{:?}", d);
        if d.biological_invariant_violation {
            prop_assert_eq!((d.temp_basal, d.micro_bolus), (0.0, 0.0));
        }
        if exercising {
            prop_assert_eq!(d.micro_bolus, 0.0);
        }
    }

    #[test]
    fn advisory_insulin_stays_within_envelope(
        cycles in prop::collection::vec((0.0f64..3.0, 0.0f64..6.0, 3i64..15), 1..80)
    ) {
        let s = LoopSettings::default();
        let mut arbiter = SafetyArbiter::new(&s);
        let duration = s.temp_basal_duration();
        let bound = arbiter.bound();
        let mut at = t0();
        for (safety_rate, ml_rate, gap) in cycles {
            let bounded = arbiter.temp_basal(at, safety_rate, ml_rate, duration);
            let entry = SafetyLedgerEntry {
                ml_temp_basal: Some(bounded.rate),
                ..SafetyLedgerEntry::temp_basal(at, s.temp_basal_duration_min, bounded.rate, safety_rate)
            };
            arbiter.record_programmed_dose(entry).unwrap();
            at += Duration::minutes(gap);
            let a = arbiter.ml_attribution(at);
            prop_assert!(a.positive <= bound + 1e-6, "positive {} bound {}", a.positive, bound);
            prop_assert!(a.negative >= -bound - 1e-6, "negative {} bound {}", a.negative, bound);
        }
    }
}
