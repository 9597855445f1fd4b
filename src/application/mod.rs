//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain rules against the stores:
//! - Ban registry (ban records in the counter store)
//! - Rate limiter (admission decisions)
//! - Alert emitter and audit logger (side effects)
//! - Reset hook and invariant auditor (operations)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod alerts;
pub mod audit;
pub mod bans;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod invariants;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod reset;
