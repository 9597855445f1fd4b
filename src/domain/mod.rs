//! Domain layer - pure types and rules with no I/O.
//!
//! This layer contains the core concepts of the gate:
//! - Client identity and the store keys derived from it
//! - Admission policy (threshold, window, ban lifetime, failure modes)
//! - Gate decisions
//! - Exempt path rules
//! - Persisted log and alert records
//! - Invariants checked by audit

pub mod client;
pub mod decision;
pub mod exemption;
pub mod invariant;
pub mod policy;
pub mod records;
