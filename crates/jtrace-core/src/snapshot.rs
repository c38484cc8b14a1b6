//! Opaque, immutable textual state captured at one step.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Textual representation of program state at a single step.
///
/// Produced by whatever instrumentation the caller uses; the tracer never
/// inspects the content, only whether one was supplied. Cloning is cheap
/// (shared buffer).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StateSnapshot(Arc<str>);

impl StateSnapshot {
    /// Wrap a string as a snapshot.
    #[must_use]
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// Borrow the snapshot text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join snapshots with `\n`, oldest first.
    ///
    /// Returns `None` for an empty input.
    #[must_use]
    pub fn join<'a, I>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut it = parts.into_iter();
        let first = it.next()?;
        let mut buf = String::from(first.as_str());
        for s in it {
            buf.push('\n');
            buf.push_str(s.as_str());
        }
        Some(Self::new(buf))
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StateSnapshot {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateSnapshot {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateSnapshot {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<StateSnapshot> for String {
    fn from(s: StateSnapshot) -> Self {
        s.as_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_preserves_order() {
        let parts: Vec<StateSnapshot> = vec!["a=1".into(), "a=2".into(), "a=3".into()];
        let joined = StateSnapshot::join(&parts).unwrap();
        assert_eq!(joined.as_str(), "a=1\na=2\na=3");
        assert!(StateSnapshot::join(std::iter::empty()).is_none());
    }

    #[test]
    fn serializes_as_plain_string() {
        let s = StateSnapshot::from("x");
        assert_eq!(serde_json::to_string(&s).unwrap(), r#""x""#);
    }
}
