//! Store-state invariants that are checked by audit rather than enforced.

use thiserror::Error;

use crate::domain::client::ClientId;

/// A broken invariant found in store state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// A ban exists but no alert was ever recorded for the client
    #[error("client {client} is banned but no alert was recorded")]
    BanWithoutAlert { client: ClientId },
    /// A window counter exists without a TTL and will never reset
    #[error("window counter for {client} has no expiry")]
    CounterWithoutExpiry { client: ClientId },
}

impl InvariantViolation {
    /// The client the violation concerns.
    pub fn client(&self) -> &ClientId {
        match self {
            InvariantViolation::BanWithoutAlert { client }
            | InvariantViolation::CounterWithoutExpiry { client } => client,
        }
    }
}
