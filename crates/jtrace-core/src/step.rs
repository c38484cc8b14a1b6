//! Structured step records as captured by an external agent.
//!
//! A [`StepRecord`] names the declaring class (JVM-style signature such as
//! `LFiltered;`), the method, and the typed local variables visible at the
//! step. [`StepLog`] is an ordered list of them. [`ClassFilter`] drops steps
//! inside runtime classes before they reach a session.

use crate::snapshot::StateSnapshot;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current `StepLog` format version.
pub const STEP_LOG_VERSION: u16 = 1;

/// Class-signature prefixes excluded by default (runtime internals).
pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 3] = ["Ljava/", "Ljdk/", "Lsun/"];

/// Value of one local variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum LocalValue {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Reference, rendered by the agent.
    Object(String),
}

impl LocalValue {
    /// TOML rendering. `Float` widens to the `f64` nearest its shortest
    /// decimal form, so `0.1_f32` prints as `0.1`; `Object` is a string.
    #[must_use]
    pub fn to_toml(&self) -> toml::Value {
        match self {
            Self::Int(v) => toml::Value::Integer(i64::from(*v)),
            Self::Long(v) => toml::Value::Integer(*v),
            Self::Float(v) => toml::Value::Float(widen_f32(*v)),
            Self::Double(v) => toml::Value::Float(*v),
            Self::Object(v) => toml::Value::String(v.clone()),
        }
    }

    /// Inverse of [`to_toml`](Self::to_toml) up to width: integers that fit
    /// 32 bits come back as `Int`, floats as `Double`.
    pub fn from_toml(v: &toml::Value) -> Result<Self> {
        Ok(match v {
            toml::Value::Integer(i) => i32::try_from(*i).map_or(Self::Long(*i), Self::Int),
            toml::Value::Float(f) => Self::Double(*f),
            toml::Value::String(s) => Self::Object(s.clone()),
            other => bail!("unsupported local value type: {}", other.type_str()),
        })
    }
}

fn widen_f32(v: f32) -> f64 {
    v.to_string().parse().unwrap_or_else(|_| f64::from(v))
}

impl fmt::Display for LocalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_toml())
    }
}

impl From<i32> for LocalValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for LocalValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for LocalValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for LocalValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for LocalValue {
    fn from(v: &str) -> Self {
        Self::Object(v.to_owned())
    }
}

impl From<String> for LocalValue {
    fn from(v: String) -> Self {
        Self::Object(v)
    }
}

/// One step: where execution was and what the locals held.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Declaring class signature (e.g. `LReceiver;`).
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Locals keyed by name.
    #[serde(default)]
    pub locals: BTreeMap<String, LocalValue>,
}

impl StepRecord {
    /// Record with no locals.
    #[must_use]
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            locals: BTreeMap::new(),
        }
    }

    /// Builder: add or replace a local.
    #[must_use]
    pub fn with_local(mut self, name: impl Into<String>, value: impl Into<LocalValue>) -> Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    /// Render as a snapshot: a `"class"."method"` line, then one
    /// `local."name" = value` line per local.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let mut out = format!(
            "{}.{}",
            toml::Value::String(self.class_name.clone()),
            toml::Value::String(self.method_name.clone())
        );
        for (name, value) in &self.locals {
            out.push_str(&format!(
                "\nlocal.{} = {value}",
                toml::Value::String(name.clone())
            ));
        }
        StateSnapshot::new(out)
    }
}

/// Ordered list of step records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    /// Format/version tag for forward-compat.
    pub version: u16,
    /// Steps in capture order.
    pub steps: Vec<StepRecord>,
}

impl Default for StepLog {
    fn default() -> Self {
        Self {
            version: STEP_LOG_VERSION,
            steps: Vec::new(),
        }
    }
}

impl StepLog {
    /// Empty log at the current version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn push(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// Number of steps.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the log is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// TOML document: table `step<i>` → class → method → `local` table, with
    /// the step tables in capture order.
    pub fn to_toml(&self) -> Result<String> {
        let mut root = toml::Table::new();
        for (i, step) in self.steps.iter().enumerate() {
            let locals: toml::Table = step
                .locals
                .iter()
                .map(|(k, v)| (k.clone(), v.to_toml()))
                .collect();
            let mut method = toml::Table::new();
            method.insert("local".to_owned(), toml::Value::Table(locals));
            let mut class = toml::Table::new();
            class.insert(step.method_name.clone(), toml::Value::Table(method));
            let mut entry = toml::Table::new();
            entry.insert(step.class_name.clone(), toml::Value::Table(class));
            root.insert(format!("step{i}"), toml::Value::Table(entry));
        }
        toml::to_string(&root).context("serialize step log to TOML")
    }

    /// Parse the layout written by [`to_toml`](Self::to_toml).
    pub fn from_toml(src: &str) -> Result<Self> {
        let root: toml::Table = toml::from_str(src).context("parse step log TOML")?;
        let mut indexed = Vec::with_capacity(root.len());
        for (key, entry) in &root {
            let idx: usize = key
                .strip_prefix("step")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| anyhow!("unexpected top-level key {key:?} (expected step<N>)"))?;
            let (class_name, class) = single_table(entry, key)?;
            let (method_name, method) = single_table(class, class_name)?;
            let mut rec = StepRecord::new(class_name.as_str(), method_name.as_str());
            if let Some(locals) = method.get("local") {
                let locals = locals
                    .as_table()
                    .ok_or_else(|| anyhow!("{key}: `local` is not a table"))?;
                for (name, v) in locals {
                    let value = LocalValue::from_toml(v)
                        .with_context(|| format!("{key}: local {name:?}"))?;
                    rec.locals.insert(name.clone(), value);
                }
            }
            indexed.push((idx, rec));
        }
        indexed.sort_by_key(|(i, _)| *i);
        Ok(Self {
            version: STEP_LOG_VERSION,
            steps: indexed.into_iter().map(|(_, r)| r).collect(),
        })
    }
}

/// The one `(key, table)` entry of a table that must hold exactly one.
fn single_table<'a>(v: &'a toml::Value, at: &str) -> Result<(&'a String, &'a toml::Value)> {
    let t = v
        .as_table()
        .ok_or_else(|| anyhow!("{at}: expected a table"))?;
    let mut it = t.iter();
    match (it.next(), it.next()) {
        (Some(kv), None) => Ok(kv),
        _ => bail!("{at}: expected exactly one entry, found {}", t.len()),
    }
}

/// Keeps steps whose class signature matches none of the excluded prefixes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassFilter {
    /// Excluded class-signature prefixes.
    pub excluded_prefixes: Vec<String>,
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self {
            excluded_prefixes: DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|p| (*p).to_owned())
                .collect(),
        }
    }
}

impl ClassFilter {
    /// Filter that accepts everything.
    #[must_use]
    pub const fn accept_all() -> Self {
        Self {
            excluded_prefixes: Vec::new(),
        }
    }

    /// Builder: exclude one more prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_prefixes.push(prefix.into());
        self
    }

    /// Whether steps in `class_name` are kept.
    #[must_use]
    pub fn accepts(&self, class_name: &str) -> bool {
        !self
            .excluded_prefixes
            .iter()
            .any(|p| class_name.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver_main() -> StepRecord {
        StepRecord::new("LReceiver;", "main")
            .with_local("a", 12_i32)
            .with_local("tracer", "LReceiver$JTraceReceiver;@1b6d3586")
    }

    #[test]
    fn default_filter_drops_runtime_classes() {
        let f = ClassFilter::default();
        assert!(!f.accepts("Ljava/util/ArrayList;"));
        assert!(!f.accepts("Ljdk/internal/misc/Unsafe;"));
        assert!(!f.accepts("Lsun/misc/Launcher;"));
        assert!(f.accepts("LReceiver;"));
        assert!(f.accepts("Ljavax/Foo;"));
        assert!(ClassFilter::accept_all().accepts("Ljava/lang/Object;"));
        assert!(!ClassFilter::accept_all().with_prefix("LTest").accepts("LTest$MyClass;"));
    }

    #[test]
    fn snapshot_lists_locals_in_name_order() {
        let snap = receiver_main().snapshot();
        assert_eq!(
            snap.as_str(),
            "\"LReceiver;\".\"main\"\nlocal.\"a\" = 12\nlocal.\"tracer\" = \"LReceiver$JTraceReceiver;@1b6d3586\""
        );
    }

    #[test]
    fn toml_layout_reads_back() {
        let mut log = StepLog::new();
        for i in 0..12_i32 {
            log.push(StepRecord::new("LFiltered;", "main").with_local("i", i));
        }
        log.push(receiver_main().with_local("ratio", 0.5_f64));
        let text = log.to_toml().unwrap();
        assert!(text.contains("step11"));
        let back = StepLog::from_toml(&text).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn from_toml_rejects_foreign_keys() {
        assert!(StepLog::from_toml("title = 1").is_err());
        assert!(StepLog::from_toml("[stepX.\"LA;\".m]").is_err());
    }

    #[test]
    fn wide_integers_stay_long() {
        let v = LocalValue::from_toml(&toml::Value::Integer(i64::MAX)).unwrap();
        assert_eq!(v, LocalValue::Long(i64::MAX));
        assert_eq!(LocalValue::Float(1.5).to_toml(), toml::Value::Float(1.5));
    }

    #[test]
    fn float_locals_print_shortest_form() {
        assert_eq!(LocalValue::Float(0.1).to_string(), "0.1");
        assert_eq!(LocalValue::Float(f32::INFINITY).to_string(), "inf");
        let rec = StepRecord::new("LTest;", "main").with_local("x", 0.1_f32);
        assert_eq!(
            rec.snapshot().as_str(),
            "\"LTest;\".\"main\"\nlocal.\"x\" = 0.1"
        );

        let mut log = StepLog::new();
        log.push(rec);
        let text = log.to_toml().unwrap();
        assert!(text.contains("x = 0.1\n"), "{text}");
        assert!(!text.contains("0.100000001"), "{text}");
    }

    #[test]
    fn toml_steps_follow_capture_order() {
        let mut log = StepLog::new();
        for i in 0..12_i32 {
            log.push(StepRecord::new("LFiltered;", "main").with_local("i", i));
        }
        let text = log.to_toml().unwrap();
        let at = |key: &str| text.find(&format!("[{key}.")).unwrap();
        assert!(at("step1") < at("step2"));
        assert!(at("step2") < at("step10"));
        assert!(at("step10") < at("step11"));
    }
}
