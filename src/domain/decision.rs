//! Outcome of the admission check for one request.

/// Decision about how to handle a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Path is exempt; no state was read or written
    Exempt,
    /// Request admitted. `count` is the client's position in the current
    /// window, or `None` when the counter could not be consulted and the
    /// request was admitted by the fail-open policy.
    Allow { count: Option<u64> },
    /// Client is banned
    Blocked,
    /// This request pushed the client over the threshold
    TooManyRequests { count: u64 },
    /// The store could not answer and the fail-closed policy applied
    Unavailable,
}

impl GateDecision {
    /// Whether the request may proceed to its handler.
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Exempt | GateDecision::Allow { .. })
    }

    /// HTTP status the gate answers with, `None` when the handler decides.
    pub fn rejection_status(&self) -> Option<u16> {
        match self {
            GateDecision::Exempt | GateDecision::Allow { .. } => None,
            GateDecision::Blocked => Some(403),
            GateDecision::TooManyRequests { .. } => Some(429),
            GateDecision::Unavailable => Some(503),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_and_status_mapping() {
        let cases = [
            (GateDecision::Exempt, true, None),
            (GateDecision::Allow { count: Some(1) }, true, None),
            (GateDecision::Allow { count: None }, true, None),
            (GateDecision::Blocked, false, Some(403)),
            (GateDecision::TooManyRequests { count: 101 }, false, Some(429)),
            (GateDecision::Unavailable, false, Some(503)),
        ];

        for (decision, admitted, status) in cases {
            assert_eq!(decision.is_admitted(), admitted, "{decision:?}");
            assert_eq!(decision.rejection_status(), status, "{decision:?}");
        }
    }
}
