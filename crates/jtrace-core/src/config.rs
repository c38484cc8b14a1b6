//! Tracer configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML
//! profile, then environment variables. The CLI applies its flags on top.
//!
//! ```toml
//! state_only = true
//! cadence = "per-step"
//! retention = "concatenate"
//! shape = "counted"
//! out = "trace.toml"
//!
//! [filter]
//! excluded_prefixes = ["Ljava/", "Ljdk/", "Lsun/", "Lkotlin/"]
//! ```

use crate::filter::{FilterPolicy, RecordShape};
use crate::io::{OutputTarget, OUT_ENV};
use crate::session::{Cadence, SessionConfig, SnapshotRetention};
use crate::step::ClassFilter;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `true`/`false` (also `1`/`0`, `yes`/`no`) for the state-only policy.
pub const STATE_ONLY_ENV: &str = "JTRACE_STATE_ONLY";
/// `per-step` or `at-end`.
pub const CADENCE_ENV: &str = "JTRACE_CADENCE";
/// Comma-separated class prefixes; replaces the default exclusion list.
pub const EXCLUDE_ENV: &str = "JTRACE_EXCLUDE";

/// Resolved tracer settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Emit the snapshot with each record.
    pub state_only: bool,
    /// Emission cadence.
    pub cadence: Cadence,
    /// Snapshot retained for deferred emission.
    pub retention: SnapshotRetention,
    /// Record shape for sinks built from this config.
    pub shape: RecordShape,
    /// Step-log output file; stdout when unset.
    pub out: Option<PathBuf>,
    /// Class exclusion filter.
    pub filter: ClassFilter,
}

impl TraceConfig {
    /// Parse a TOML profile.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("parse trace config TOML")
    }

    /// Read a TOML profile from disk.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&src).with_context(|| format!("in {}", path.display()))
    }

    /// Overlay the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|k| std::env::var(k).ok())
    }

    /// Overlay variables from `get` (the environment, or a map in tests).
    pub fn with_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = get(STATE_ONLY_ENV) {
            self.state_only = parse_bool(&v).with_context(|| format!("{STATE_ONLY_ENV}={v}"))?;
        }
        if let Some(v) = get(CADENCE_ENV) {
            self.cadence = match v.trim().to_ascii_lowercase().as_str() {
                "per-step" | "per_step" | "step" => Cadence::PerStep,
                "at-end" | "at_end" | "end" => Cadence::AtEnd,
                other => bail!("{CADENCE_ENV}: unknown cadence {other:?} (use per-step|at-end)"),
            };
        }
        if let Some(v) = get(EXCLUDE_ENV) {
            self.filter.excluded_prefixes = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = get(OUT_ENV) {
            if !v.is_empty() {
                self.out = Some(PathBuf::from(v));
            }
        }
        Ok(self)
    }

    /// Filter policy implied by `state_only`.
    #[must_use]
    pub const fn policy(&self) -> FilterPolicy {
        FilterPolicy::new(self.state_only)
    }

    /// Session knobs, with the policy pinned.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            cadence: self.cadence,
            retention: self.retention,
            policy: Some(self.policy()),
        }
    }

    /// Where a finished step log goes.
    #[must_use]
    pub fn output_target(&self) -> OutputTarget {
        OutputTarget::from_var(self.out.clone())
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_fixtures() {
        let c = TraceConfig::default();
        assert!(!c.state_only);
        assert_eq!(c.cadence, Cadence::AtEnd);
        assert_eq!(c.shape, RecordShape::Counted);
        assert_eq!(c.output_target(), OutputTarget::Stdout);
        assert!(!c.filter.accepts("Ljava/lang/String;"));
    }

    #[test]
    fn toml_profile_then_env() {
        let c = TraceConfig::from_toml_str(
            r#"
            cadence = "per-step"
            retention = "concatenate"
            [filter]
            excluded_prefixes = ["Lkotlin/"]
            "#,
        )
        .unwrap();
        assert_eq!(c.cadence, Cadence::PerStep);
        assert_eq!(c.retention, SnapshotRetention::Concatenate);
        assert!(c.filter.accepts("Ljava/lang/String;"));

        let c = c
            .with_vars(vars(&[
                (STATE_ONLY_ENV, "yes"),
                (CADENCE_ENV, "at-end"),
                (EXCLUDE_ENV, "LA, LB,"),
                (OUT_ENV, "out/trace.toml"),
            ]))
            .unwrap();
        assert!(c.state_only);
        assert_eq!(c.cadence, Cadence::AtEnd);
        assert_eq!(c.filter.excluded_prefixes, ["LA", "LB"]);
        assert_eq!(
            c.output_target(),
            OutputTarget::File("out/trace.toml".into())
        );
        assert_eq!(c.session_config().policy, Some(FilterPolicy::STATE_ONLY));
    }

    #[test]
    fn bad_env_values_fail() {
        let base = TraceConfig::default();
        assert!(base.clone().with_vars(vars(&[(STATE_ONLY_ENV, "maybe")])).is_err());
        assert!(base.with_vars(vars(&[(CADENCE_ENV, "sometimes")])).is_err());
    }
}
