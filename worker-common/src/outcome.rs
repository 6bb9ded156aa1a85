//! Outcome classification shared by dispatch, metrics and benchmarks.

use serde::{Deserialize, Serialize};

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The model server answered with a 2xx response.
    Success,
    /// Rejected at admission: the model process is not ready.
    NotReady,
    /// Rejected at admission: waited longer than the route's queue limit.
    QueueTimeout,
    /// No handler is configured for the route.
    UnknownRoute,
    /// The model server could not be reached or did not answer in time.
    TransportFailure,
    /// The model server answered with a non-2xx status.
    UpstreamError,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 6] = [
        OutcomeKind::Success,
        OutcomeKind::NotReady,
        OutcomeKind::QueueTimeout,
        OutcomeKind::UnknownRoute,
        OutcomeKind::TransportFailure,
        OutcomeKind::UpstreamError,
    ];

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }

    /// Whether the request was turned away before reaching the model server.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            OutcomeKind::NotReady | OutcomeKind::QueueTimeout | OutcomeKind::UnknownRoute
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::NotReady => "not_ready",
            OutcomeKind::QueueTimeout => "queue_timeout",
            OutcomeKind::UnknownRoute => "unknown_route",
            OutcomeKind::TransportFailure => "transport_failure",
            OutcomeKind::UpstreamError => "upstream_error",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for kind in OutcomeKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_rejection_kinds() {
        assert!(OutcomeKind::NotReady.is_rejection());
        assert!(OutcomeKind::QueueTimeout.is_rejection());
        assert!(OutcomeKind::UnknownRoute.is_rejection());
        assert!(!OutcomeKind::TransportFailure.is_rejection());
        assert!(!OutcomeKind::Success.is_rejection());
    }
}
