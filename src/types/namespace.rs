//! Per-repository-and-branch partition keys.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Isolates vector and lexical records of one repository branch.
///
/// Rendered as `{owner}_{repo}_{branch}` with each part sanitized to
/// lowercase ASCII alphanumerics and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(owner: &str, repo: &str, branch: &str) -> Result<Self, ConfigError> {
        let owner = sanitize(owner);
        let repo = sanitize(repo);
        let branch = sanitize(branch);

        if owner.is_empty() {
            return Err(ConfigError::invalid("owner", "sanitizes to an empty string"));
        }
        if repo.is_empty() {
            return Err(ConfigError::invalid("name", "sanitizes to an empty string"));
        }
        if branch.is_empty() {
            return Err(ConfigError::invalid("branch", "sanitizes to an empty string"));
        }

        Ok(Self(format!("{owner}_{repo}_{branch}")))
    }

    /// Wrap an already-rendered key, e.g. one received at the query boundary.
    pub fn from_key(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ConfigError::Missing("namespace"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, map every run of other characters to a single `-`, trim `-`.
fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut last_dash = false;
    for c in part.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}
