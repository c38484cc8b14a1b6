//! I/O helpers for the `StepLog` envelope.
//!
//! Supports JSON/CBOR/TOML and line-delimited JSON (`.jsonl`/`.ndjson`, one
//! `StepRecord` per line) with extension-based auto-detection. Unknown or
//! missing extensions are rejected for reads and default to JSON for writes.
//!
//! [`OutputTarget`] resolves where a finished TOML step log goes: the file
//! named by `JTRACE_OUT`, or stdout.

use crate::step::{StepLog, StepRecord};
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Environment variable naming the output file for a finished step log.
pub const OUT_ENV: &str = "JTRACE_OUT";

/// Ensure the parent directory for a file exists (no-op if none).
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/* ---------------- JSON ---------------- */

/// Read a `StepLog` from **JSON**.
pub fn read_step_log_json<P: AsRef<Path>>(path: P) -> Result<StepLog> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let rdr = BufReader::new(f);
    let v: StepLog = serde_json::from_reader(rdr).context("deserialize JSON step log")?;
    Ok(v)
}

/// Write a `StepLog` to **JSON** (pretty).
pub fn write_step_log_json<P: AsRef<Path>>(path: P, v: &StepLog) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, v).context("serialize JSON step log")?;
    w.flush().context("flush JSON writer")?;
    Ok(())
}

/* ---------------- CBOR ---------------- */

/// Read a `StepLog` from **CBOR**.
pub fn read_step_log_cbor<P: AsRef<Path>>(path: P) -> Result<StepLog> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let mut rdr = BufReader::new(f);
    let v: StepLog = ciborium::de::from_reader(&mut rdr).context("deserialize CBOR step log")?;
    Ok(v)
}

/// Write a `StepLog` to **CBOR**.
pub fn write_step_log_cbor<P: AsRef<Path>>(path: P, v: &StepLog) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(v, &mut w).context("serialize CBOR step log")?;
    w.flush().context("flush CBOR writer")?;
    Ok(())
}

/* ---------------- TOML ---------------- */

/// Read a `StepLog` from the **TOML** step layout.
pub fn read_step_log_toml<P: AsRef<Path>>(path: P) -> Result<StepLog> {
    let path_ref = path.as_ref();
    let src =
        fs::read_to_string(path_ref).with_context(|| format!("read {}", path_ref.display()))?;
    StepLog::from_toml(&src).with_context(|| format!("parse {}", path_ref.display()))
}

/// Write a `StepLog` in the **TOML** step layout.
pub fn write_step_log_toml<P: AsRef<Path>>(path: P, v: &StepLog) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    fs::write(path_ref, v.to_toml()?).with_context(|| format!("write {}", path_ref.display()))
}

/* ---------------- JSON Lines ---------------- */

/// Owning JSONL iterator over `StepRecord`.
///
/// Yields `Err` with the line number for malformed or empty lines.
pub struct JsonlStepIter<R> {
    rdr: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> JsonlStepIter<R> {
    /// Iterate records from any buffered reader.
    pub fn new(rdr: R) -> Self {
        Self {
            rdr,
            buf: String::with_capacity(1 << 10),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for JsonlStepIter<R> {
    type Item = Result<StepRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.rdr.read_line(&mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                let line = self.buf.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    return Some(Err(anyhow!("parse jsonl line {}: empty line", self.line_no)));
                }
                Some(
                    serde_json::from_str(line)
                        .with_context(|| format!("parse jsonl line {}", self.line_no)),
                )
            }
            Err(e) => Some(Err(e).with_context(|| format!("read line {}", self.line_no + 1))),
        }
    }
}

/// Stream read: one JSON `StepRecord` per line.
pub fn stream_steps_jsonl<P: AsRef<Path>>(path: P) -> Result<JsonlStepIter<BufReader<File>>> {
    let f = File::open(path.as_ref())
        .with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(JsonlStepIter::new(BufReader::new(f)))
}

/// Write records as JSON Lines (one object per line).
pub fn write_steps_jsonl<P: AsRef<Path>>(path: P, steps: &[StepRecord]) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let mut w = BufWriter::new(f);
    for s in steps {
        serde_json::to_writer(&mut w, s).context("serialize step to json")?;
        w.write_all(b"\n").context("write newline")?;
    }
    w.flush().context("flush writer")?;
    Ok(())
}

/* --------------- Auto-detect by extension --------------- */

/// Auto-detect **read** by extension (`.json` / `.cbor` / `.toml` / `.jsonl` / `.ndjson`).
pub fn read_step_log_auto<P: AsRef<Path>>(path: P) -> Result<StepLog> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_step_log_json(path),
        Some("cbor") => read_step_log_cbor(path),
        Some("toml") => read_step_log_toml(path),
        Some("jsonl" | "ndjson") => {
            let steps = stream_steps_jsonl(path)?.collect::<Result<Vec<_>>>()?;
            Ok(StepLog {
                steps,
                ..StepLog::default()
            })
        }
        Some(other) => Err(anyhow!(
            "unsupported step log extension: {other} (supported: .json, .cbor, .toml, .jsonl, .ndjson)"
        )),
        None => Err(anyhow!(
            "path has no extension (expected .json, .cbor, .toml, .jsonl or .ndjson)"
        )),
    }
}

/// Auto-detect **write** (defaults to JSON if unknown/missing).
pub fn write_step_log_auto<P: AsRef<Path>>(path: P, v: &StepLog) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_step_log_cbor(path, v),
        Some("toml") => write_step_log_toml(path, v),
        Some("jsonl" | "ndjson") => write_steps_jsonl(path, &v.steps),
        _ => write_step_log_json(path, v),
    }
}

/* --------------- Output target --------------- */

/// Where a finished TOML step log is written.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputTarget {
    /// Standard output.
    #[default]
    Stdout,
    /// A file, created or truncated.
    File(PathBuf),
}

impl OutputTarget {
    /// `File` when `JTRACE_OUT` is set and non-empty, else `Stdout`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_var(std::env::var_os(OUT_ENV).map(PathBuf::from))
    }

    /// Resolve from an optional path value.
    #[must_use]
    pub fn from_var(value: Option<PathBuf>) -> Self {
        match value {
            Some(p) if !p.as_os_str().is_empty() => Self::File(p),
            _ => Self::Stdout,
        }
    }

    /// Write the TOML rendering of `log`.
    pub fn write_toml(&self, log: &StepLog) -> Result<()> {
        match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(log.to_toml()?.as_bytes())
                    .context("write step log to stdout")?;
                out.flush().context("flush stdout")
            }
            Self::File(p) => write_step_log_toml(p, log),
        }
    }
}

/* ---------------- Small helpers ---------------- */

#[inline]
fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn jsonl_iterator_reports_line_numbers() {
        let src = "{\"class_name\":\"LA;\",\"method_name\":\"m\"}\n\n{bad}\n";
        let items: Vec<_> = JsonlStepIter::new(Cursor::new(src)).collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().class_name, "LA;");
        assert!(format!("{:#}", items[1].as_ref().unwrap_err()).contains("line 2"));
        assert!(format!("{:#}", items[2].as_ref().unwrap_err()).contains("line 3"));
    }

    #[test]
    fn output_target_resolution() {
        assert_eq!(OutputTarget::from_var(None), OutputTarget::Stdout);
        assert_eq!(
            OutputTarget::from_var(Some(PathBuf::new())),
            OutputTarget::Stdout
        );
        assert_eq!(
            OutputTarget::from_var(Some("trace.toml".into())),
            OutputTarget::File("trace.toml".into())
        );
    }

    #[test]
    fn unknown_extension_is_rejected_on_read() {
        let err = read_step_log_auto("steps.yaml").unwrap_err();
        assert!(err.to_string().contains("unsupported"));
        assert!(read_step_log_auto("steps").is_err());
    }
}
