//! Runner identifiers.
//!
//! Every ephemeral runner is named `<os>[-arm64]-<run_id>-<run_attempt>`,
//! e.g. `14-123456-1` or `14-arm64-123456-1`. The name doubles as the
//! workflow-job label GitHub routes on, so it is the only key that ties the
//! queued, in_progress and completed events of one job together.

use derive_more::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::sync::LazyLock;
use thiserror::Error;

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(?:\.\d+)?(?:-arm64)?-\d+-\d+$").expect("runner name regex is valid")
});

const ARM64_SUFFIX: &str = "-arm64";

/// A string does not follow the runner identifier grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a runner identifier: {0:?}")]
pub struct RunnerNameError(pub String);

/// A validated runner identifier.
///
/// Only the raw string is kept; the components are sliced out of it on
/// demand so they always reconstruct the original exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct RunnerName(String);

impl RunnerName {
    /// Parse a runner identifier, rejecting anything outside the grammar.
    pub fn parse(s: impl Into<String>) -> Result<Self, RunnerNameError> {
        let s = s.into();
        if NAME_REGEX.is_match(&s) {
            Ok(Self(s))
        } else {
            Err(RunnerNameError(s))
        }
    }

    /// Check a string against the grammar without allocating.
    pub fn is_valid(s: &str) -> bool {
        NAME_REGEX.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `(runner_label, run_id, run_attempt)`.
    fn parts(&self) -> (&str, &str, &str) {
        // The grammar guarantees exactly two '-' after the runner label.
        let mut it = self.0.rsplitn(3, '-');
        let run_attempt = it.next().unwrap_or_default();
        let run_id = it.next().unwrap_or_default();
        let label = it.next().unwrap_or_default();
        (label, run_id, run_attempt)
    }

    /// The runner label, `<os>[-arm64]`. This is what VM images are keyed by.
    pub fn runner_label(&self) -> &str {
        self.parts().0
    }

    /// OS version, e.g. `14` or `14.1`.
    pub fn os(&self) -> &str {
        let label = self.runner_label();
        label.strip_suffix(ARM64_SUFFIX).unwrap_or(label)
    }

    pub fn is_arm64(&self) -> bool {
        self.runner_label().ends_with(ARM64_SUFFIX)
    }

    pub fn run_id(&self) -> &str {
        self.parts().1
    }

    pub fn run_attempt(&self) -> &str {
        self.parts().2
    }
}

impl std::str::FromStr for RunnerName {
    type Err = RunnerNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RunnerName {
    type Error = RunnerNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<RunnerName> for String {
    fn from(name: RunnerName) -> Self {
        name.0
    }
}

impl Borrow<str> for RunnerName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RunnerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_x86_name() {
        let name = RunnerName::parse("14-123456-1").unwrap();
        assert_eq!(name.os(), "14");
        assert!(!name.is_arm64());
        assert_eq!(name.run_id(), "123456");
        assert_eq!(name.run_attempt(), "1");
        assert_eq!(name.runner_label(), "14");
    }

    #[test]
    fn test_parse_arm64_name() {
        let name = RunnerName::parse("14-arm64-123456-2").unwrap();
        assert_eq!(name.os(), "14");
        assert!(name.is_arm64());
        assert_eq!(name.run_id(), "123456");
        assert_eq!(name.run_attempt(), "2");
        assert_eq!(name.runner_label(), "14-arm64");
    }

    #[test]
    fn test_parse_fractional_os() {
        let name = RunnerName::parse("10.15-99-3").unwrap();
        assert_eq!(name.os(), "10.15");
        assert_eq!(name.run_id(), "99");
        assert_eq!(name.run_attempt(), "3");
    }

    #[test]
    fn test_components_reconstruct_original() {
        for raw in [
            "14-100-1",
            "14-arm64-100-1",
            "13.1-arm64-0042-007",
            "12.6-1-1",
        ] {
            let name = RunnerName::parse(raw).unwrap();
            let arch = if name.is_arm64() { "-arm64" } else { "" };
            let rebuilt = format!(
                "{}{}-{}-{}",
                name.os(),
                arch,
                name.run_id(),
                name.run_attempt()
            );
            assert_eq!(rebuilt, raw);
        }
    }

    #[test]
    fn test_rejects_malformed_names() {
        for raw in [
            "",
            "self-hosted",
            "macos-14",
            "14-100",
            "14-arm64-100",
            "14-x86_64-100-1",
            "14.-100-1",
            ".5-100-1",
            "14-100-1-2",
            " 14-100-1",
            "14-100-1\n",
            "14-arm64-arm64-100-1",
            "-14-100-1",
        ] {
            assert!(RunnerName::parse(raw).is_err(), "{raw:?} should not parse");
            assert!(!RunnerName::is_valid(raw));
        }
    }

    #[test]
    fn test_error_keeps_input() {
        let err = RunnerName::parse("ubuntu-latest").unwrap_err();
        assert_eq!(err, RunnerNameError("ubuntu-latest".to_string()));
    }

    #[test]
    fn test_serde_validates() {
        let name: RunnerName = serde_json::from_str("\"14-100-1\"").unwrap();
        assert_eq!(name.as_str(), "14-100-1");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"14-100-1\"");

        let bad: Result<RunnerName, _> = serde_json::from_str("\"ubuntu-latest\"");
        assert!(bad.is_err());
    }
}
