//! jtrace-core: step-scoped execution tracing.
//!
//! This crate defines the **receiver-side contract** of the tracer:
//! - a [`TraceSession`] that brackets a region of code and counts steps,
//! - the [`ReceiverSink`] trait and its three variants (process-wide
//!   [`GlobalSink`], owned [`InstanceSink`], accumulating [`BufferingSink`]),
//! - the [`FilterPolicy`] that decides whether records carry the snapshot, and
//! - structured step logs ([`StepRecord`], [`StepLog`]) with JSON/CBOR/TOML I/O.
//!
//! Steps are *reported* by the caller; nothing here discovers them.
//!
//! ```
//! use jtrace_core::{BufferingSink, RecordShape, SessionConfig, TraceSession};
//!
//! let sink = BufferingSink::new(RecordShape::Raw);
//! let mut session = TraceSession::with_config(sink, SessionConfig::per_step());
//! session.start();
//! session.report_step(Some("A".into()))?;
//! session.report_step(Some("B".into()))?;
//! session.end()?;
//! assert_eq!(session.sink().records(), ["A", "B"]);
//! # Ok::<(), jtrace_core::TraceError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
// Small, explicit allowlist to keep docs readable and APIs ergonomic.
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Typed configuration (defaults, TOML profile, environment).
pub mod config;
/// Per-session step counter.
pub mod counter;
/// Contract error type.
pub mod error;
/// Filter policy and record rendering.
pub mod filter;
/// JSON/CBOR/TOML/JSONL helpers for `StepLog`, plus `JTRACE_OUT` routing.
pub mod io;
/// Bridge from structured step records into a session.
pub mod recorder;
/// Start/end bracket driving a sink.
pub mod session;
/// Receiver sinks: global, instance, buffering.
pub mod sink;
/// Opaque state snapshot.
pub mod snapshot;
/// Structured step records and runtime-class filtering.
pub mod step;

// ---- Re-exports for workspace compatibility ----
pub use config::TraceConfig;
pub use counter::StepCounter;
pub use error::{Result, TraceError};
pub use filter::{FilterPolicy, RecordShape};
pub use recorder::StepRecorder;
pub use session::{Cadence, SessionConfig, SessionSummary, SnapshotRetention, TraceSession};
pub use sink::{BufferingSink, GlobalSink, InstanceSink, ReceiverSink, SharedBufferingSink};
pub use snapshot::StateSnapshot;
pub use step::{ClassFilter, LocalValue, StepLog, StepRecord};

/// Commonly-used items for quick imports.
///
/// ```rust
/// use jtrace_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        error::TraceError,
        filter::{FilterPolicy, RecordShape},
        session::{Cadence, SessionConfig, TraceSession},
        sink::{BufferingSink, GlobalSink, InstanceSink, ReceiverSink},
        snapshot::StateSnapshot,
    };
}
