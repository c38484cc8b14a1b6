//! Receiver sinks.
//!
//! Every sink speaks the same [`ReceiverSink`] contract (`start`, `end`,
//! `receive`) and differs only in where records go and who may share it:
//!
//! - [`GlobalSink`]: one output channel shared by every session bound to it.
//!   State sits behind a mutex so concurrent sessions emit whole records.
//!   [`GlobalSink::stdout`] is the process-wide instance.
//! - [`InstanceSink`]: owned by one session or caller; nothing is shared.
//! - [`BufferingSink`]: appends records to an ordered in-memory log instead of
//!   writing them out. [`SharedBufferingSink`] is the lock-guarded handle for
//!   buffers shared across threads.
//!
//! Sinks never call back into a session.

use crate::error::Result;
use crate::filter::{FilterPolicy, RecordShape};
use crate::snapshot::StateSnapshot;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Destination for step records.
///
/// `start`/`end` are bracket hooks and default to no-ops. `receive_with`
/// renders under an explicit policy (what sessions use, so a session's policy
/// stays frozen once started); `receive` uses the sink's own current policy.
pub trait ReceiverSink {
    /// Bracket hook fired by a session `start`.
    fn start(&mut self) {}

    /// Bracket hook fired by a session `end`.
    fn end(&mut self) {}

    /// The sink's current filter policy.
    fn policy(&self) -> FilterPolicy;

    /// Route one record rendered under `policy`.
    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()>;

    /// Route one record rendered under the sink's current policy.
    fn receive(&mut self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        let policy = self.policy();
        self.receive_with(policy, count, snapshot)
    }
}

impl<S: ReceiverSink + ?Sized> ReceiverSink for &mut S {
    fn start(&mut self) {
        (**self).start();
    }

    fn end(&mut self) {
        (**self).end();
    }

    fn policy(&self) -> FilterPolicy {
        (**self).policy()
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        (**self).receive_with(policy, count, snapshot)
    }

    fn receive(&mut self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        (**self).receive(count, snapshot)
    }
}

impl<S: ReceiverSink + ?Sized> ReceiverSink for Box<S> {
    fn start(&mut self) {
        (**self).start();
    }

    fn end(&mut self) {
        (**self).end();
    }

    fn policy(&self) -> FilterPolicy {
        (**self).policy()
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        (**self).receive_with(policy, count, snapshot)
    }

    fn receive(&mut self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        (**self).receive(count, snapshot)
    }
}

/// Write one record plus newline and flush.
fn emit_line<W: Write>(out: &mut W, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

/* ---------------- GlobalSink ---------------- */

#[derive(Debug)]
struct GlobalState<W> {
    policy: FilterPolicy,
    shape: RecordShape,
    open: usize,
    emitted: u64,
    out: W,
}

/// Shared sink writing to one output channel.
///
/// Bind sessions to `&GlobalSink`. Policy changes through [`set_policy`]
/// affect only records received afterwards.
///
/// [`set_policy`]: GlobalSink::set_policy
#[derive(Debug)]
pub struct GlobalSink<W = io::Stdout> {
    inner: Mutex<GlobalState<W>>,
}

impl GlobalSink<io::Stdout> {
    /// The process-wide sink on stdout, created on first use.
    pub fn stdout() -> &'static Self {
        static GLOBAL: OnceLock<GlobalSink> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(io::stdout()))
    }
}

impl<W: Write> GlobalSink<W> {
    /// Shared sink over `out`, unfiltered, `Counted` shape.
    #[must_use]
    pub fn new(out: W) -> Self {
        Self::with_shape(out, RecordShape::Counted)
    }

    /// Shared sink over `out` with the given record shape.
    #[must_use]
    pub fn with_shape(out: W, shape: RecordShape) -> Self {
        Self {
            inner: Mutex::new(GlobalState {
                policy: FilterPolicy::UNFILTERED,
                shape,
                open: 0,
                emitted: 0,
                out,
            }),
        }
    }

    /// Current policy.
    #[must_use]
    pub fn policy(&self) -> FilterPolicy {
        self.inner.lock().policy
    }

    /// Replace the policy for subsequent receives.
    pub fn set_policy(&self, policy: FilterPolicy) {
        self.inner.lock().policy = policy;
    }

    /// Flip the `state_only` flag for subsequent receives.
    pub fn set_state_only(&self, state_only: bool) {
        self.set_policy(FilterPolicy::new(state_only));
    }

    /// Sessions currently between `start` and `end` on this sink.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().open
    }

    /// Records emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.inner.lock().emitted
    }

    /// Run `f` with exclusive access to the output channel.
    pub fn with_output<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.inner.lock().out)
    }

    /// Consume the sink and return its output channel.
    pub fn into_inner(self) -> W {
        self.inner.into_inner().out
    }

    fn emit(
        &self,
        policy: Option<FilterPolicy>,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        // Policy read, render and write under one lock.
        let mut st = self.inner.lock();
        let policy = policy.unwrap_or(st.policy);
        let line = policy.render(st.shape, count, snapshot)?;
        emit_line(&mut st.out, &line)?;
        st.emitted += 1;
        trace!(count, state_only = policy.state_only, "global sink emitted record");
        Ok(())
    }
}

impl<W: Write> ReceiverSink for &GlobalSink<W> {
    fn start(&mut self) {
        let mut st = self.inner.lock();
        st.open += 1;
        debug!(open = st.open, "global sink start");
    }

    fn end(&mut self) {
        let mut st = self.inner.lock();
        if st.open == 0 {
            warn!("global sink end without matching start");
            return;
        }
        st.open -= 1;
        debug!(open = st.open, "global sink end");
    }

    fn policy(&self) -> FilterPolicy {
        (**self).policy()
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        self.emit(Some(policy), count, snapshot)
    }

    fn receive(&mut self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        self.emit(None, count, snapshot)
    }
}

/* ---------------- InstanceSink ---------------- */

/// Sink owned by one session or caller, writing to a private channel.
#[derive(Debug)]
pub struct InstanceSink<W = io::Stdout> {
    policy: FilterPolicy,
    shape: RecordShape,
    emitted: u64,
    out: W,
}

impl InstanceSink<io::Stdout> {
    /// Instance sink on stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> InstanceSink<W> {
    /// Unfiltered `Counted` sink over `out`.
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            policy: FilterPolicy::UNFILTERED,
            shape: RecordShape::Counted,
            emitted: 0,
            out,
        }
    }

    /// Builder: initial policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FilterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder: record shape.
    #[must_use]
    pub fn with_shape(mut self, shape: RecordShape) -> Self {
        self.shape = shape;
        self
    }

    /// Replace the policy for subsequent receives.
    pub fn set_policy(&mut self, policy: FilterPolicy) {
        self.policy = policy;
    }

    /// Records emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Borrow the output channel.
    #[must_use]
    pub const fn writer(&self) -> &W {
        &self.out
    }

    /// Consume the sink and return its output channel.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReceiverSink for InstanceSink<W> {
    fn policy(&self) -> FilterPolicy {
        self.policy
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        let line = policy.render(self.shape, count, snapshot)?;
        emit_line(&mut self.out, &line)?;
        self.emitted += 1;
        trace!(count, state_only = policy.state_only, "instance sink emitted record");
        Ok(())
    }
}

/* ---------------- BufferingSink ---------------- */

/// Accumulates rendered records in insertion order.
///
/// Records outlive the session that produced them; they are only removed by
/// [`take`](Self::take) or [`clear`](Self::clear).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferingSink {
    policy: FilterPolicy,
    shape: RecordShape,
    records: Vec<String>,
}

impl BufferingSink {
    /// Empty, unfiltered buffer speaking `shape`.
    #[must_use]
    pub const fn new(shape: RecordShape) -> Self {
        Self {
            policy: FilterPolicy::UNFILTERED,
            shape,
            records: Vec::new(),
        }
    }

    /// Builder: initial policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FilterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the policy for subsequent receives.
    pub fn set_policy(&mut self, policy: FilterPolicy) {
        self.policy = policy;
    }

    /// Record shape fixed at construction.
    #[must_use]
    pub const fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Append a raw entry, bypassing rendering.
    pub fn add(&mut self, text: impl Into<String>) {
        self.records.push(text.into());
    }

    /// Records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain every record, oldest first.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.records)
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl ReceiverSink for BufferingSink {
    fn policy(&self) -> FilterPolicy {
        self.policy
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        let record = policy.render(self.shape, count, snapshot)?;
        self.records.push(record);
        Ok(())
    }
}

/// Cloneable, lock-guarded handle to one [`BufferingSink`].
///
/// Clones append to the same buffer; each append runs under the lock so
/// insertion order is the order in which receives acquired it.
#[derive(Debug, Clone, Default)]
pub struct SharedBufferingSink(Arc<Mutex<BufferingSink>>);

impl SharedBufferingSink {
    /// Empty shared buffer speaking `shape`.
    #[must_use]
    pub fn new(shape: RecordShape) -> Self {
        Self::from(BufferingSink::new(shape))
    }

    /// Replace the policy for subsequent receives.
    pub fn set_policy(&self, policy: FilterPolicy) {
        self.0.lock().set_policy(policy);
    }

    /// Append a raw entry.
    pub fn add(&self, text: impl Into<String>) {
        self.0.lock().add(text);
    }

    /// Copy of the records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        self.0.lock().records().to_vec()
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Drain every record, oldest first.
    #[must_use]
    pub fn take(&self) -> Vec<String> {
        self.0.lock().take()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl From<BufferingSink> for SharedBufferingSink {
    fn from(sink: BufferingSink) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }
}

impl ReceiverSink for SharedBufferingSink {
    fn policy(&self) -> FilterPolicy {
        self.0.lock().policy()
    }

    fn receive_with(
        &mut self,
        policy: FilterPolicy,
        count: u64,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<()> {
        self.0.lock().receive_with(policy, count, snapshot)
    }

    fn receive(&mut self, count: u64, snapshot: Option<&StateSnapshot>) -> Result<()> {
        self.0.lock().receive(count, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn global_policy_flip_is_not_retroactive() {
        let g = GlobalSink::new(Vec::new());
        let mut s = &g;
        s.receive(10, Some(&"st".into())).unwrap();
        g.set_state_only(true);
        s.receive(10, Some(&"st".into())).unwrap();
        assert_eq!(
            text(g.into_inner()),
            "steps: 10\nfiltered steps: 10\nst\n"
        );
    }

    #[test]
    fn global_hooks_count_open_sessions() {
        let g = GlobalSink::new(io::sink());
        let (mut a, mut b) = (&g, &g);
        a.start();
        b.start();
        assert_eq!(g.open_sessions(), 2);
        a.end();
        b.end();
        b.end();
        assert_eq!(g.open_sessions(), 0);
    }

    #[test]
    fn instance_sinks_are_isolated() {
        let mut a = InstanceSink::new(Vec::new()).with_policy(FilterPolicy::STATE_ONLY);
        let mut b = InstanceSink::new(Vec::new());
        a.receive(1, Some(&"a".into())).unwrap();
        b.receive(1, Some(&"b".into())).unwrap();
        assert_eq!(b.policy(), FilterPolicy::UNFILTERED);
        assert_eq!(text(a.into_inner()), "filtered steps: 1\na\n");
        assert_eq!(text(b.into_inner()), "steps: 1\n");
    }

    #[test]
    fn missing_snapshot_writes_nothing() {
        let mut s = InstanceSink::new(Vec::new()).with_policy(FilterPolicy::STATE_ONLY);
        let err = s.receive(1, None).unwrap_err();
        assert!(matches!(err, TraceError::MissingSnapshot { count: 1 }));
        assert_eq!(s.emitted(), 0);
        assert!(s.writer().is_empty());
    }

    #[test]
    fn buffering_keeps_order_and_survives_hooks() {
        let mut b = BufferingSink::new(RecordShape::Counted);
        b.start();
        for n in 1..=3 {
            b.receive(n, None).unwrap();
        }
        b.end();
        assert_eq!(b.records(), ["steps: 1", "steps: 2", "steps: 3"]);
        assert_eq!(b.take().len(), 3);
        assert!(b.is_empty());
    }

    #[test]
    fn shared_buffer_clones_share_records() {
        let shared = SharedBufferingSink::new(RecordShape::Raw);
        let mut handle = shared.clone();
        handle.receive(1, Some(&"A".into())).unwrap();
        shared.add("B");
        assert_eq!(shared.records(), ["A", "B"]);
    }

    #[test]
    fn boxed_sink_dispatches() {
        let mut boxed: Box<dyn ReceiverSink> = Box::new(BufferingSink::new(RecordShape::Raw));
        boxed.receive(5, None).unwrap();
        assert_eq!(boxed.policy(), FilterPolicy::UNFILTERED);
    }
}
