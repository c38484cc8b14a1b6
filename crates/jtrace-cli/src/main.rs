// crates/jtrace-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jtrace_core::{
    io::{read_step_log_auto, write_step_log_auto, OutputTarget},
    BufferingSink, Cadence, ClassFilter, GlobalSink, InstanceSink, ReceiverSink, RecordShape,
    SessionConfig, SessionSummary, SnapshotRetention, StateSnapshot, StepLog, StepRecord,
    StepRecorder, TraceConfig, TraceSession,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "jtrace",
    about = "Step-scoped execution tracer",
    long_about = "Step-scoped execution tracer.\n\nReplay captured step logs through a trace session and sink, convert step logs between formats, or run the built-in calling-pattern demos.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    /// TOML profile applied before environment variables and flags
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Feed a step log through a session and print what the sink receives.
    Replay(ReplayArgs),

    /// Convert a step log (JSON/CBOR/TOML/JSONL).
    /// Without --out, writes TOML to $JTRACE_OUT or stdout.
    Export {
        /// Input step log
        #[arg(long)]
        log: PathBuf,

        /// Output path; format chosen by extension
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run one of the built-in calling patterns.
    Demo {
        /// Which pattern
        #[arg(value_enum)]
        which: DemoOpt,
    },
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Input step log (JSON/CBOR/TOML/JSONL)
    #[arg(long)]
    log: PathBuf,

    /// Receiver sink variant
    #[arg(long, value_enum, default_value_t = SinkOpt::Instance)]
    sink: SinkOpt,

    /// Emit the snapshot with each record
    #[arg(long, overrides_with = "no_state_only")]
    state_only: bool,

    /// Count-only records, even if config or environment enable state-only
    #[arg(long, overrides_with = "state_only")]
    no_state_only: bool,

    /// Emission cadence (defaults to config/env, else at-end)
    #[arg(long, value_enum)]
    cadence: Option<CadenceOpt>,

    /// Snapshot kept for deferred emission
    #[arg(long, value_enum)]
    retention: Option<RetentionOpt>,

    /// Record shape
    #[arg(long, value_enum)]
    shape: Option<ShapeOpt>,

    /// Extra class prefix to exclude (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Also write the kept steps here (format by extension)
    #[arg(long)]
    keep: Option<PathBuf>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum SinkOpt {
    /// Shared sink on stdout
    Global,
    /// Sink owned by the session, on stdout
    Instance,
    /// In-memory buffer, printed after the session ends
    Buffer,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum CadenceOpt {
    PerStep,
    AtEnd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum RetentionOpt {
    Last,
    Concat,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum ShapeOpt {
    Counted,
    Raw,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum DemoOpt {
    /// Count-only, then state-only, on the shared sink
    Filtered,
    /// Accumulating receiver read back after the bracket
    Receiver,
    /// Receiver that prints only the snapshot
    Interfaces,
    /// Structured steps through the recorder, log written as TOML
    Counter,
}

impl ReplayArgs {
    /// The last of `--state-only` / `--no-state-only`, if either was given.
    const fn state_only(&self) -> Option<bool> {
        if self.state_only {
            Some(true)
        } else if self.no_state_only {
            Some(false)
        } else {
            None
        }
    }
}

impl From<CadenceOpt> for Cadence {
    fn from(c: CadenceOpt) -> Self {
        match c {
            CadenceOpt::PerStep => Self::PerStep,
            CadenceOpt::AtEnd => Self::AtEnd,
        }
    }
}

impl From<RetentionOpt> for SnapshotRetention {
    fn from(r: RetentionOpt) -> Self {
        match r {
            RetentionOpt::Last => Self::Last,
            RetentionOpt::Concat => Self::Concatenate,
        }
    }
}

impl From<ShapeOpt> for RecordShape {
    fn from(s: ShapeOpt) -> Self {
        match s {
            ShapeOpt::Counted => Self::Counted,
            ShapeOpt::Raw => Self::Raw,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    match cli.cmd {
        Cmd::Replay(args) => replay(apply_flags(cfg, &args), &args),
        Cmd::Export { log, out } => export(&cfg, log, out),
        Cmd::Demo { which } => demo(&cfg, which, io::stdout().lock()),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
///
/// Logs go to stderr; stdout carries the trace records.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Defaults, then the optional TOML profile, then the environment.
fn load_config(path: Option<&PathBuf>) -> Result<TraceConfig> {
    let base = match path {
        Some(p) => TraceConfig::from_toml_file(p)?,
        None => TraceConfig::default(),
    };
    base.with_env().context("applying JTRACE_* environment")
}

/// CLI flags win over config and environment.
fn apply_flags(mut cfg: TraceConfig, args: &ReplayArgs) -> TraceConfig {
    if let Some(on) = args.state_only() {
        cfg.state_only = on;
    }
    if let Some(c) = args.cadence {
        cfg.cadence = c.into();
    }
    if let Some(r) = args.retention {
        cfg.retention = r.into();
    }
    if let Some(s) = args.shape {
        cfg.shape = s.into();
    }
    cfg.filter
        .excluded_prefixes
        .extend(args.exclude.iter().cloned());
    cfg
}

fn replay(cfg: TraceConfig, args: &ReplayArgs) -> Result<()> {
    let log = read_step_log_auto(&args.log)
        .with_context(|| format!("reading step log {}", args.log.display()))?;
    info!(
        log = %args.log.display(),
        steps = log.len(),
        sink = ?args.sink,
        cadence = ?cfg.cadence,
        state_only = cfg.state_only,
        "replaying step log"
    );

    let (kept, summary) = match args.sink {
        SinkOpt::Global => {
            let global = GlobalSink::with_shape(io::stdout(), cfg.shape);
            global.set_policy(cfg.policy());
            let (kept, summary, _) = drive(&global, &cfg, log)?;
            (kept, summary)
        }
        SinkOpt::Instance => {
            let sink = InstanceSink::stdout()
                .with_policy(cfg.policy())
                .with_shape(cfg.shape);
            let (kept, summary, _) = drive(sink, &cfg, log)?;
            (kept, summary)
        }
        SinkOpt::Buffer => {
            let sink = BufferingSink::new(cfg.shape).with_policy(cfg.policy());
            let (kept, summary, mut sink) = drive(sink, &cfg, log)?;
            for record in sink.take() {
                println!("{record}");
            }
            (kept, summary)
        }
    };

    if let Some(path) = &args.keep {
        write_step_log_auto(path, &kept)
            .with_context(|| format!("writing kept steps to {}", path.display()))?;
        info!(path = %path.display(), kept = kept.len(), "wrote kept steps");
    }
    if let Some(s) = summary {
        info!(steps = s.steps, emissions = s.emissions, "session closed");
    }
    Ok(())
}

/// One bracket over every record of `log`; returns the kept steps and the sink.
fn drive<S: ReceiverSink>(
    sink: S,
    cfg: &TraceConfig,
    log: StepLog,
) -> Result<(StepLog, Option<SessionSummary>, S)> {
    let session = TraceSession::with_config(sink, cfg.session_config());
    let mut recorder = StepRecorder::with_filter(session, cfg.filter.clone());
    recorder.start();
    for (i, step) in log.steps.into_iter().enumerate() {
        recorder
            .observe(step)
            .with_context(|| format!("reporting step {i}"))?;
    }
    let (kept, summary) = recorder.finish().context("closing trace session")?;
    Ok((kept, summary, recorder.into_session().into_sink()))
}

fn export(cfg: &TraceConfig, log: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let steps =
        read_step_log_auto(&log).with_context(|| format!("reading step log {}", log.display()))?;
    info!(infile = %log.display(), steps = steps.len(), "export step log");
    match out {
        Some(path) => {
            write_step_log_auto(&path, &steps)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Exported {} steps → {}", steps.len(), path.display());
        }
        None => cfg.output_target().write_toml(&steps)?,
    }
    Ok(())
}

/// Run a built-in calling pattern, writing its records to `out`.
fn demo<W: Write>(cfg: &TraceConfig, which: DemoOpt, mut out: W) -> Result<()> {
    info!(?which, "running demo");
    match which {
        DemoOpt::Filtered => {
            let global = GlobalSink::new(&mut out);
            let mut session = TraceSession::new(&global);
            for state_only in [false, true] {
                global.set_state_only(state_only);
                session.start();
                for i in 1..=10 {
                    session.report_step(Some(StateSnapshot::from(format!("i = {i}"))))?;
                }
                session.end()?;
            }
        }
        DemoOpt::Receiver => {
            let mut session = TraceSession::with_config(
                BufferingSink::new(RecordShape::Raw),
                SessionConfig::per_step(),
            );
            session.start();
            session.report_step(Some("A".into()))?;
            session.report_step(Some("B".into()))?;
            session.end()?;
            writeln!(out, "{:?}", session.sink().records())?;
        }
        DemoOpt::Interfaces => {
            let sink = InstanceSink::new(&mut out).with_shape(RecordShape::Raw);
            let mut session = TraceSession::new(sink);
            session.start();
            session.report_step(Some("sub.compareTo(blt) = 0".into()))?;
            session.end()?;
        }
        DemoOpt::Counter => {
            let session =
                TraceSession::with_config(InstanceSink::new(&mut out), cfg.session_config());
            let mut recorder = StepRecorder::with_filter(session, ClassFilter::default());
            recorder.start();
            for step in counter_steps() {
                recorder.observe(step)?;
            }
            let (log, _) = recorder.finish()?;
            match cfg.output_target() {
                OutputTarget::Stdout => out.write_all(log.to_toml()?.as_bytes())?,
                file => file.write_toml(&log)?,
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Steps of a small program bumping a counter field through a method call.
fn counter_steps() -> Vec<StepRecord> {
    vec![
        StepRecord::new("LTest;", "main").with_local("f", 12_i32),
        StepRecord::new("LTest;", "main")
            .with_local("f", 12_i32)
            .with_local("local", 42_i32),
        StepRecord::new("Ljava/io/PrintStream;", "println"),
        StepRecord::new("LTest$MyClass;", "printSelf")
            .with_local("this", "LTest$MyClass;@7852e922")
            .with_local("myState", 1_i32),
    ]
}
