//! Paths that bypass the gate entirely.
//!
//! Two kinds of rule are supported: prefixes (`/dashboard` matches
//! `/dashboard/stats`) and exact paths (`/reset-redis`). Matching is on the
//! request path only, never the query string.

use std::collections::BTreeSet;

/// Set of exempt path rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptPaths {
    prefixes: BTreeSet<String>,
    exact: BTreeSet<String>,
}

impl ExemptPaths {
    /// Create an empty rule set; nothing is exempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempt every path starting with `prefix`. Empty prefixes are ignored,
    /// since they would exempt everything.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.add_prefix(prefix);
        self
    }

    /// Exempt exactly `path`.
    pub fn with_exact(mut self, path: impl Into<String>) -> Self {
        self.add_exact(path);
        self
    }

    pub(crate) fn add_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.prefixes.insert(prefix);
        }
    }

    pub(crate) fn add_exact(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !path.is_empty() {
            self.exact.insert(path);
        }
    }

    /// Whether `path` bypasses rate limiting and ban checks.
    pub fn is_exempt(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.exact.contains(path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Configured prefixes, sorted.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    /// Configured exact paths, sorted.
    pub fn exact_paths(&self) -> impl Iterator<Item = &str> {
        self.exact.iter().map(String::as_str)
    }
}
