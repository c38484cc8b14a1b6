//! Filter policy and the textual record format.
//!
//! The record format is the only wire format of the tracer and must stay
//! byte-compatible with existing receivers:
//!
//! ```text
//! steps: <N>                      # unfiltered
//! filtered steps: <N>             # state-only, followed by
//! <snapshot text>                 #   the raw snapshot on its own line
//! ```

use crate::error::{Result, TraceError};
use crate::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};

/// Prefix printed before the step line under a state-only policy.
pub const FILTERED_PREFIX: &str = "filtered ";

/// Whether emitted records carry the snapshot or only the step count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Records are prefixed and followed by the raw snapshot text.
    pub state_only: bool,
}

impl FilterPolicy {
    /// Count-only records.
    pub const UNFILTERED: Self = Self { state_only: false };
    /// Prefixed records followed by the snapshot.
    pub const STATE_ONLY: Self = Self { state_only: true };

    /// Construct from the raw flag.
    #[inline]
    #[must_use]
    pub const fn new(state_only: bool) -> Self {
        Self { state_only }
    }

    /// Whether a record under this policy needs a snapshot.
    #[inline]
    #[must_use]
    pub const fn requires_snapshot(self) -> bool {
        self.state_only
    }

    /// Reject a missing snapshot when the policy needs one.
    pub fn check(self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        if self.requires_snapshot() && snapshot.is_none() {
            return Err(TraceError::MissingSnapshot { count });
        }
        Ok(())
    }

    /// Render one record in the given shape.
    ///
    /// Multi-line records (state-only) are joined with `\n` and carry no
    /// trailing newline; line-oriented sinks append their own.
    pub fn render(
        self,
        shape: RecordShape,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<String> {
        self.check(count, snapshot)?;
        let out = match (shape, snapshot) {
            (RecordShape::Raw, Some(s)) => s.as_str().to_owned(),
            (RecordShape::Raw, None) => count.to_string(),
            (RecordShape::Counted, Some(s)) if self.state_only => {
                format!("{FILTERED_PREFIX}steps: {count}\n{s}")
            }
            (RecordShape::Counted, _) => format!("steps: {count}"),
        };
        Ok(out)
    }
}

/// Which of the two receive shapes a sink speaks.
///
/// Fixed per sink at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordShape {
    /// `(snapshot, count)`: the record is `steps: N`.
    #[default]
    Counted,
    /// `(snapshot)`: the record is the snapshot text (or `N` when absent).
    Raw,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_ignores_snapshot() {
        let snap = StateSnapshot::from("X");
        let line = FilterPolicy::UNFILTERED
            .render(RecordShape::Counted, 1, Some(&snap))
            .unwrap();
        assert_eq!(line, "steps: 1");
        let line = FilterPolicy::UNFILTERED
            .render(RecordShape::Counted, 10, None)
            .unwrap();
        assert_eq!(line, "steps: 10");
    }

    #[test]
    fn state_only_prefixes_and_appends_snapshot() {
        let snap = StateSnapshot::from("i = 10");
        let line = FilterPolicy::STATE_ONLY
            .render(RecordShape::Counted, 10, Some(&snap))
            .unwrap();
        assert_eq!(line, "filtered steps: 10\ni = 10");
    }

    #[test]
    fn state_only_without_snapshot_fails() {
        let err = FilterPolicy::STATE_ONLY
            .render(RecordShape::Counted, 4, None)
            .unwrap_err();
        assert!(matches!(err, TraceError::MissingSnapshot { count: 4 }));
        let err = FilterPolicy::STATE_ONLY
            .render(RecordShape::Raw, 2, None)
            .unwrap_err();
        assert!(matches!(err, TraceError::MissingSnapshot { count: 2 }));
    }

    #[test]
    fn raw_shape_is_verbatim() {
        let snap = StateSnapshot::from("A");
        let p = FilterPolicy::default();
        assert_eq!(p.render(RecordShape::Raw, 1, Some(&snap)).unwrap(), "A");
        assert_eq!(p.render(RecordShape::Raw, 7, None).unwrap(), "7");
    }
}
