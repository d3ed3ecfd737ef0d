//! Company identifiers.
//!
//! A company key names a directory under the outputs root and prefixes every
//! artifact inside it, so it has to be safe to join onto a path.

use std::fmt;

use serde::Serialize;

use crate::error::{BriefrunError, Result};

/// A validated company identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CompanyKey(String);

impl CompanyKey {
    /// Trim and validate a raw company string.
    ///
    /// Rejects empty input, path separators, `.`/`..`, leading dots (which
    /// would collide with marker files) and control characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(BriefrunError::InvalidArgument("company is required".into()));
        }
        if key.starts_with('.') {
            return Err(BriefrunError::InvalidArgument(format!(
                "company must not start with '.': {key:?}"
            )));
        }
        if key.contains(['/', '\\']) {
            return Err(BriefrunError::InvalidArgument(format!(
                "company must not contain path separators: {key:?}"
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(BriefrunError::InvalidArgument(
                "company must not contain control characters".into(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_accepts_plain_names() {
        let key = CompanyKey::parse("  Acme Corp  ").unwrap();
        assert_eq!(key.as_str(), "Acme Corp");
        assert_eq!(key.to_string(), "Acme Corp");
    }

    #[test]
    fn accepts_non_ascii_names() {
        let key = CompanyKey::parse("株式会社サンプル").unwrap();
        assert_eq!(key.as_str(), "株式会社サンプル");
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            CompanyKey::parse("   "),
            Err(BriefrunError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_traversal() {
        for raw in ["..", ".", "../etc", "a/b", "a\\b", ".running", "bad\0name"] {
            assert!(
                matches!(CompanyKey::parse(raw), Err(BriefrunError::InvalidArgument(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let key = CompanyKey::parse("acme").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""acme""#);
    }
}
