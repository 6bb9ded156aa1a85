//! Readiness of the backing model process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health state of the model process, inferred from its log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Process started, no load marker seen yet.
    Starting,
    /// Model loaded and serving.
    Ready,
    /// An error marker was seen, or the log stream was lost.
    Errored,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Starting => write!(f, "starting"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Errored => write!(f, "errored"),
        }
    }
}

/// Snapshot of the readiness state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessState {
    pub status: Readiness,
    /// The log line that caused the most recent match.
    #[serde(default)]
    pub last_line: Option<String>,
    /// When `status` last changed.
    pub changed_at: DateTime<Utc>,
    /// Set when the log stream itself became unreadable.
    #[serde(default)]
    pub monitor_lost: bool,
}

impl ReadinessState {
    pub fn starting() -> Self {
        Self {
            status: Readiness::Starting,
            last_line: None,
            changed_at: Utc::now(),
            monitor_lost: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::starting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_serialization() {
        let json = serde_json::to_string(&Readiness::Errored).unwrap();
        assert_eq!(json, r#""errored""#);

        let parsed: Readiness = serde_json::from_str(r#""ready""#).unwrap();
        assert_eq!(parsed, Readiness::Ready);
    }

    #[test]
    fn test_starting_state() {
        let state = ReadinessState::starting();
        assert_eq!(state.status, Readiness::Starting);
        assert!(state.last_line.is_none());
        assert!(!state.monitor_lost);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = ReadinessState::starting();
        state.status = Readiness::Ready;
        state.last_line = Some("Application startup complete.".to_string());

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["last_line"], "Application startup complete.");
        assert_eq!(json["monitor_lost"], false);
    }
}
