//! Client identity and the store keys derived from it.
//!
//! A client is identified by the textual form of its IP address. Every piece of
//! per-client state lives under a key derived from that identifier:
//! - `rate:{client}` - request count for the current window
//! - `blocked:{client}` - ban sentinel

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Key prefix for per-client window counters.
pub const RATE_KEY_PREFIX: &str = "rate:";

/// Key prefix for per-client ban records.
pub const BLOCKED_KEY_PREFIX: &str = "blocked:";

/// Identifier used when a request carries no usable peer address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Identifier of the client a request is attributed to.
///
/// Cheap to clone; the identifier text is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Arc<str>);

impl ClientId {
    /// Create a client identifier from its textual form.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Identifier shared by all requests whose origin could not be determined.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CLIENT)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of this client's window counter.
    pub fn rate_key(&self) -> String {
        format!("{RATE_KEY_PREFIX}{}", self.0)
    }

    /// Store key of this client's ban record.
    pub fn blocked_key(&self) -> String {
        format!("{BLOCKED_KEY_PREFIX}{}", self.0)
    }

    /// Recover a client identifier from a `rate:` or `blocked:` key.
    pub fn from_key(key: &str) -> Option<Self> {
        key.strip_prefix(RATE_KEY_PREFIX)
            .or_else(|| key.strip_prefix(BLOCKED_KEY_PREFIX))
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl From<IpAddr> for ClientId {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip.to_string())
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_keys_follow_store_layout() {
        let client = ClientId::new("9.9.9.9");
        assert_eq!(client.rate_key(), "rate:9.9.9.9");
        assert_eq!(client.blocked_key(), "blocked:9.9.9.9");
    }

    #[test]
    fn test_from_ip() {
        let v4 = ClientId::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(v4.as_str(), "10.0.0.1");

        let v6 = ClientId::from(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.as_str(), "::1");
        assert_eq!(v6.blocked_key(), "blocked:::1");
    }

    #[test]
    fn test_from_key_round_trips_both_prefixes() {
        let client = ClientId::new("::1");
        assert_eq!(ClientId::from_key(&client.rate_key()), Some(client.clone()));
        assert_eq!(ClientId::from_key(&client.blocked_key()), Some(client));
        assert_eq!(ClientId::from_key("other:1.2.3.4"), None);
        assert_eq!(ClientId::from_key("rate:"), None);
    }

    #[test]
    fn test_unknown_client() {
        assert_eq!(ClientId::unknown().to_string(), "unknown");
    }
}
