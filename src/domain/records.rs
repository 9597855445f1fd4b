//! Append-only records persisted by the gate.
//!
//! Both record types are immutable facts. They serialize to the same document
//! shape the dashboard reads: `{timestamp, ip, endpoint, method, status}` for
//! logs and `{timestamp, ip, type, severity}` for alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::client::ClientId;

/// One completed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    /// Request path including the query string
    pub endpoint: String,
    pub method: String,
    /// Final response status code
    pub status: u16,
}

impl LogRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        client: &ClientId,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            timestamp,
            ip: client.to_string(),
            endpoint: endpoint.into(),
            method: method.into(),
            status,
        }
    }
}

/// Kind of security alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// A client crossed the request threshold and was banned
    #[serde(rename = "Rate Limit Exceeded")]
    RateLimitExceeded,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::RateLimitExceeded => f.write_str("Rate Limit Exceeded"),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        };
        f.write_str(s)
    }
}

/// A security alert raised at a ban transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
}

impl AlertRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        client: &ClientId,
        kind: AlertKind,
        severity: Severity,
    ) -> Self {
        Self {
            timestamp,
            ip: client.to_string(),
            kind,
            severity,
        }
    }

    /// Whether this alert was raised for `client`.
    pub fn concerns(&self, client: &ClientId) -> bool {
        self.ip == client.as_str()
    }
}
