//! Start/end bracket around a traced region.
//!
//! ```text
//! Idle --start()--> Active --report_step()*--> Active --end()--> Idle
//! ```
//!
//! A session owns its [`StepCounter`] and freezes its [`FilterPolicy`] at
//! `start`. Whether records go out on every step or once at `end` is chosen
//! through [`Cadence`]; neither is canonical.

use crate::counter::StepCounter;
use crate::error::{Result, TraceError};
use crate::filter::FilterPolicy;
use crate::sink::ReceiverSink;
use crate::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// When a session hands records to its sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
    /// One `receive` per reported step.
    PerStep,
    /// A single `receive` at `end` carrying the final count.
    #[default]
    AtEnd,
}

/// Which snapshot a deferred (`AtEnd`) emission carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotRetention {
    /// The most recent snapshot reported.
    #[default]
    Last,
    /// Every snapshot reported, joined with `\n`.
    Concatenate,
}

/// Per-session knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Emission cadence.
    pub cadence: Cadence,
    /// Snapshot kept for deferred emission.
    pub retention: SnapshotRetention,
    /// Fixed policy; `None` captures the sink's policy at each `start`.
    pub policy: Option<FilterPolicy>,
}

impl SessionConfig {
    /// Emit on every step.
    #[must_use]
    pub fn per_step() -> Self {
        Self {
            cadence: Cadence::PerStep,
            ..Self::default()
        }
    }

    /// Emit once at `end` (the default).
    #[must_use]
    pub fn at_end() -> Self {
        Self::default()
    }

    /// Builder: pin the policy instead of inheriting the sink's.
    #[must_use]
    pub const fn with_policy(mut self, policy: FilterPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builder: snapshot retention for deferred emission.
    #[must_use]
    pub const fn with_retention(mut self, retention: SnapshotRetention) -> Self {
        self.retention = retention;
        self
    }
}

/// What a completed session observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Steps reported since the matching `start`.
    pub steps: u64,
    /// Records handed to the sink during the session.
    pub emissions: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Active,
}

/// A reusable start/end bracket bound to one sink.
#[derive(Debug)]
pub struct TraceSession<S> {
    sink: S,
    config: SessionConfig,
    state: State,
    counter: StepCounter,
    policy: FilterPolicy,
    emissions: u64,
    pending: Vec<StateSnapshot>,
}

impl<S: ReceiverSink> TraceSession<S> {
    /// Idle session over `sink` with the default (deferred) config.
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, SessionConfig::default())
    }

    /// Idle session over `sink`.
    pub fn with_config(sink: S, config: SessionConfig) -> Self {
        let policy = config.policy.unwrap_or_else(|| sink.policy());
        Self {
            sink,
            config,
            state: State::Idle,
            counter: StepCounter::new(),
            policy,
            emissions: 0,
            pending: Vec::new(),
        }
    }

    /// Enter the active state with a zeroed counter.
    ///
    /// Restarts the bracket if already active. The sink sees one `start` per
    /// bracket, so a restart does not reopen it.
    pub fn start(&mut self) {
        self.policy = self.config.policy.unwrap_or_else(|| self.sink.policy());
        self.counter.reset();
        self.emissions = 0;
        self.pending.clear();
        if self.state == State::Idle {
            self.sink.start();
        }
        self.state = State::Active;
        debug!(
            cadence = ?self.config.cadence,
            state_only = self.policy.state_only,
            "trace session started"
        );
    }

    /// Record one step, returning the new count.
    ///
    /// Fails with [`TraceError::InvalidState`] outside `start`/`end`. Under
    /// [`Cadence::PerStep`], a step is counted only once the sink accepts it:
    /// a state-only policy without a snapshot fails with
    /// [`TraceError::MissingSnapshot`] and a failed write with
    /// [`TraceError::Emit`], and neither advances the count.
    pub fn report_step(&mut self, snapshot: Option<StateSnapshot>) -> Result<u64> {
        if self.state != State::Active {
            return Err(TraceError::InvalidState);
        }
        match self.config.cadence {
            Cadence::PerStep => {
                let next = self.counter.get().saturating_add(1);
                self.policy.check(next, snapshot.as_ref())?;
                self.sink
                    .receive_with(self.policy, next, snapshot.as_ref())?;
                self.emissions += 1;
                Ok(self.counter.advance())
            }
            Cadence::AtEnd => {
                let count = self.counter.advance();
                if let Some(s) = snapshot {
                    if self.config.retention == SnapshotRetention::Last {
                        self.pending.clear();
                    }
                    self.pending.push(s);
                }
                Ok(count)
            }
        }
    }

    /// Leave the active state.
    ///
    /// Under [`Cadence::AtEnd`] this performs the one deferred `receive`. The
    /// session is idle afterwards even if that receive fails. On an idle
    /// session this does nothing and returns `Ok(None)`.
    pub fn end(&mut self) -> Result<Option<SessionSummary>> {
        if self.state == State::Idle {
            return Ok(None);
        }
        self.state = State::Idle;

        let deferred = if self.config.cadence == Cadence::AtEnd {
            let snapshot = StateSnapshot::join(&self.pending);
            self.pending.clear();
            let r = self
                .sink
                .receive_with(self.policy, self.counter.get(), snapshot.as_ref());
            if r.is_ok() {
                self.emissions += 1;
            }
            r
        } else {
            Ok(())
        };
        self.sink.end();
        debug!(
            steps = self.counter.get(),
            emissions = self.emissions,
            "trace session ended"
        );
        deferred?;

        Ok(Some(SessionSummary {
            steps: self.counter.get(),
            emissions: self.emissions,
        }))
    }

    /// Run `f` inside a `start`/`end` bracket.
    ///
    /// The bracket is closed even when `f` fails; `f`'s error wins.
    pub fn scope<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<(R, SessionSummary)> {
        self.start();
        let out = f(self);
        let ended = self.end();
        let value = out?;
        let summary = ended?.unwrap_or(SessionSummary {
            steps: self.counter.get(),
            emissions: self.emissions,
        });
        Ok((value, summary))
    }
}

impl<S> TraceSession<S> {
    /// Whether the session is between `start` and `end`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Steps reported since the latest `start`.
    ///
    /// Still readable after `end` until the next `start`.
    #[must_use]
    pub const fn step_count(&self) -> u64 {
        self.counter.get()
    }

    /// Policy in force (frozen at the latest `start`).
    #[must_use]
    pub const fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Borrow the sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink (e.g. to change its policy between sessions).
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the session and return its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RecordShape;
    use crate::sink::BufferingSink;

    fn buffered(config: SessionConfig) -> TraceSession<BufferingSink> {
        TraceSession::with_config(BufferingSink::new(RecordShape::Counted), config)
    }

    #[test]
    fn step_before_start_is_rejected() {
        let mut s = buffered(SessionConfig::default());
        let err = s.report_step(None).unwrap_err();
        assert!(matches!(err, TraceError::InvalidState));
        assert_eq!(s.step_count(), 0);
    }

    #[test]
    fn deferred_emits_once_with_final_count() {
        let mut s = buffered(SessionConfig::at_end());
        s.start();
        for _ in 0..10 {
            s.report_step(None).unwrap();
        }
        assert!(s.sink().is_empty());
        let summary = s.end().unwrap().unwrap();
        assert_eq!(summary, SessionSummary { steps: 10, emissions: 1 });
        assert_eq!(s.sink().records(), ["steps: 10"]);
    }

    #[test]
    fn per_step_emits_every_step() {
        let mut s = buffered(SessionConfig::per_step());
        s.start();
        s.report_step(None).unwrap();
        s.report_step(None).unwrap();
        s.end().unwrap();
        assert_eq!(s.sink().records(), ["steps: 1", "steps: 2"]);
    }

    #[test]
    fn second_end_is_a_no_op() {
        let mut s = buffered(SessionConfig::at_end());
        s.start();
        s.report_step(None).unwrap();
        assert!(s.end().unwrap().is_some());
        assert!(s.end().unwrap().is_none());
        assert_eq!(s.sink().len(), 1);
    }

    #[test]
    fn restart_resets_counter() {
        let mut s = buffered(SessionConfig::at_end());
        s.start();
        s.report_step(None).unwrap();
        s.report_step(None).unwrap();
        s.end().unwrap();
        assert_eq!(s.step_count(), 2);
        s.start();
        assert_eq!(s.step_count(), 0);
        s.report_step(None).unwrap();
        s.end().unwrap();
        assert_eq!(s.sink().records(), ["steps: 2", "steps: 1"]);
    }

    #[test]
    fn per_step_missing_snapshot_does_not_count() {
        let cfg = SessionConfig::per_step().with_policy(FilterPolicy::STATE_ONLY);
        let mut s = buffered(cfg);
        s.start();
        let err = s.report_step(None).unwrap_err();
        assert!(matches!(err, TraceError::MissingSnapshot { count: 1 }));
        assert_eq!(s.step_count(), 0);
        assert_eq!(s.report_step(Some("x".into())).unwrap(), 1);
    }

    #[test]
    fn deferred_missing_snapshot_still_closes() {
        let cfg = SessionConfig::at_end().with_policy(FilterPolicy::STATE_ONLY);
        let mut s = buffered(cfg);
        s.start();
        s.report_step(None).unwrap();
        assert!(matches!(
            s.end().unwrap_err(),
            TraceError::MissingSnapshot { count: 1 }
        ));
        assert!(!s.is_active());
        assert!(s.end().unwrap().is_none());
    }

    #[test]
    fn retention_last_vs_concatenate() {
        let cfg = SessionConfig::at_end().with_policy(FilterPolicy::STATE_ONLY);
        let mut last = buffered(cfg);
        let mut all = buffered(cfg.with_retention(SnapshotRetention::Concatenate));
        for s in [&mut last, &mut all] {
            s.start();
            s.report_step(Some("i=0".into())).unwrap();
            s.report_step(None).unwrap();
            s.report_step(Some("i=1".into())).unwrap();
            s.end().unwrap();
        }
        assert_eq!(last.sink().records(), ["filtered steps: 3\ni=1"]);
        assert_eq!(all.sink().records(), ["filtered steps: 3\ni=0\ni=1"]);
    }

    #[test]
    fn policy_is_frozen_at_start() {
        let mut s = buffered(SessionConfig::per_step());
        s.start();
        s.sink_mut().set_policy(FilterPolicy::STATE_ONLY);
        s.report_step(None).unwrap();
        s.end().unwrap();
        s.start();
        assert_eq!(s.policy(), FilterPolicy::STATE_ONLY);
        s.report_step(Some("snap".into())).unwrap();
        s.end().unwrap();
        assert_eq!(
            s.into_sink().take(),
            ["steps: 1", "filtered steps: 1\nsnap"]
        );
    }

    #[test]
    fn scope_closes_on_error() {
        let mut s = buffered(SessionConfig::at_end());
        let r: Result<((), SessionSummary)> = s.scope(|s| {
            s.report_step(None)?;
            Err(TraceError::InvalidState)
        });
        assert!(r.is_err());
        assert!(!s.is_active());
        assert_eq!(s.sink().records(), ["steps: 1"]);

        let (n, summary) = s.scope(|s| s.report_step(None)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(summary.steps, 1);
    }
}
