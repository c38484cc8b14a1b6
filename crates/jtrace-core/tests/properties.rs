//! Property tests for the session counter and buffering order.

#![allow(clippy::unwrap_used)]

use jtrace_core::{
    BufferingSink, FilterPolicy, RecordShape, ReceiverSink, SessionConfig, StateSnapshot,
    TraceSession,
};
use proptest::prelude::*;

proptest! {
    /// The count at `end` equals the steps reported since the latest `start`,
    /// however many earlier cycles ran.
    #[test]
    fn count_matches_reports_since_start(cycles in prop::collection::vec(0u64..50, 1..6)) {
        let mut s = TraceSession::new(BufferingSink::new(RecordShape::Counted));
        for &n in &cycles {
            s.start();
            for _ in 0..n {
                s.report_step(None).unwrap();
            }
            let summary = s.end().unwrap().unwrap();
            prop_assert_eq!(summary.steps, n);
            prop_assert_eq!(s.step_count(), n);
        }
        let expected: Vec<String> = cycles.iter().map(|n| format!("steps: {n}")).collect();
        prop_assert_eq!(s.sink().records(), expected.as_slice());
    }

    /// A buffering sink returns exactly what it received, in order.
    #[test]
    fn buffer_preserves_insertion_order(items in prop::collection::vec("[a-z]{0,8}", 0..40)) {
        let mut s = TraceSession::with_config(
            BufferingSink::new(RecordShape::Raw),
            SessionConfig::per_step(),
        );
        s.start();
        for it in &items {
            s.report_step(Some(StateSnapshot::from(it.as_str()))).unwrap();
        }
        s.end().unwrap();
        prop_assert_eq!(s.sink().records(), items.as_slice());
    }

    /// Flipping the policy only changes records received after the flip.
    #[test]
    fn policy_flips_are_forward_only(flags in prop::collection::vec(any::<bool>(), 1..10)) {
        let mut sink = BufferingSink::new(RecordShape::Counted);
        let mut expected = Vec::new();
        for (i, &flag) in flags.iter().enumerate() {
            sink.set_policy(FilterPolicy::new(flag));
            sink.receive(1, Some(&StateSnapshot::from("s"))).unwrap();
            let record = if flag { "filtered steps: 1\ns" } else { "steps: 1" };
            expected.push(record.to_owned());
            prop_assert_eq!(&sink.records()[..=i], expected.as_slice());
        }
    }
}
