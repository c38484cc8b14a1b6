//! Feed structured step records through a session.
//!
//! An external agent (debugger hook, interpreter loop) produces one
//! [`StepRecord`] per step. The recorder drops records in excluded classes,
//! keeps the rest in a [`StepLog`], and reports each kept record to its
//! [`TraceSession`] with the rendered record as the snapshot.

use crate::error::Result;
use crate::session::{SessionSummary, TraceSession};
use crate::sink::ReceiverSink;
use crate::step::{ClassFilter, StepLog, StepRecord};
use tracing::{debug, trace};

/// Class-filtering bridge from step records to a session.
#[derive(Debug)]
pub struct StepRecorder<S> {
    session: TraceSession<S>,
    filter: ClassFilter,
    log: StepLog,
    skipped: u64,
}

impl<S: ReceiverSink> StepRecorder<S> {
    /// Recorder over `session` with the default runtime-class filter.
    pub fn new(session: TraceSession<S>) -> Self {
        Self::with_filter(session, ClassFilter::default())
    }

    /// Recorder over `session` with a custom filter.
    pub fn with_filter(session: TraceSession<S>, filter: ClassFilter) -> Self {
        Self {
            session,
            filter,
            log: StepLog::new(),
            skipped: 0,
        }
    }

    /// Start the underlying session and clear the previous log.
    pub fn start(&mut self) {
        self.log = StepLog::new();
        self.skipped = 0;
        self.session.start();
    }

    /// Offer one record; returns whether it was kept and reported.
    ///
    /// Excluded records are dropped without touching the session, even when
    /// it is idle. Kept records propagate the session's errors.
    pub fn observe(&mut self, record: StepRecord) -> Result<bool> {
        if !self.filter.accepts(&record.class_name) {
            self.skipped += 1;
            trace!(class = %record.class_name, "skipping excluded class");
            return Ok(false);
        }
        self.session.report_step(Some(record.snapshot()))?;
        self.log.push(record);
        Ok(true)
    }

    /// End the session and hand back the kept records.
    ///
    /// Returns `None` for the summary when the session was already idle.
    pub fn finish(&mut self) -> Result<(StepLog, Option<SessionSummary>)> {
        let summary = self.session.end();
        let log = std::mem::take(&mut self.log);
        debug!(kept = log.len(), skipped = self.skipped, "step recorder finished");
        Ok((log, summary?))
    }

    /// Records dropped by the filter since the last `start`.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Borrow the session.
    #[must_use]
    pub const fn session(&self) -> &TraceSession<S> {
        &self.session
    }

    /// Consume the recorder and return its session.
    pub fn into_session(self) -> TraceSession<S> {
        self.session
    }
}
