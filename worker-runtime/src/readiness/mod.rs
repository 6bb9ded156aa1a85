//! Model readiness tracking from log output.
//!
//! The monitor owns a single-writer `watch` channel holding the current
//! [`ReadinessState`]. Log lines are classified with [`LogRules`]:
//!
//! - error match: `Errored` (from any state; the line is always recorded)
//! - load match while `Starting`: `Ready`
//! - info match: forwarded to our log, no state change
//!
//! There is no automatic path from `Errored` back to `Ready`. The only
//! exception is a lost log stream, which clears back to `Starting` once the
//! stream can be read again.

mod rules;
mod tail;

pub use rules::{LogMatch, LogRule, LogRules, RuleKind};
pub use tail::{observe_stream, LogTail};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use worker_common::{Readiness, ReadinessState};

use crate::error::{Error, Result};
use crate::observability::ObservabilitySink;

const MONITOR_LOST_MARKER: &str = "monitor-lost";

/// Classifies model log lines into a readiness state.
pub struct ReadinessMonitor {
    rules: LogRules,
    state: watch::Sender<ReadinessState>,
    sink: Arc<dyn ObservabilitySink>,
}

impl ReadinessMonitor {
    pub fn new(rules: LogRules, sink: Arc<dyn ObservabilitySink>) -> Self {
        let (state, _) = watch::channel(ReadinessState::starting());
        Self { rules, state, sink }
    }

    /// Current state. Never blocks on the writer.
    pub fn current(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> Readiness {
        self.state.borrow().status
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state.subscribe()
    }

    /// Classify one log line and apply the resulting transition.
    pub fn observe(&self, line: &str) -> Option<RuleKind> {
        let kind = self.rules.classify(line)?.kind;

        match kind {
            RuleKind::Error => self.update(|state| {
                let changed = state.status != Readiness::Errored || state.monitor_lost;
                state.status = Readiness::Errored;
                state.monitor_lost = false;
                state.last_line = Some(line.to_string());
                changed
            }),
            RuleKind::Load => self.update(|state| {
                if state.status != Readiness::Starting {
                    return false;
                }
                state.status = Readiness::Ready;
                state.last_line = Some(line.to_string());
                true
            }),
            RuleKind::Info => {
                tracing::info!(target: "model_log", "{}", line);
            }
        }

        Some(kind)
    }

    /// The log stream became unreadable. Admission is refused until it recovers.
    pub fn mark_stream_lost(&self, reason: &str) {
        self.update(|state| {
            // A pattern-induced error stays as it is.
            if state.status == Readiness::Errored {
                return false;
            }
            state.status = Readiness::Errored;
            state.monitor_lost = true;
            state.last_line = Some(format!("{}: {}", MONITOR_LOST_MARKER, reason));
            true
        });
    }

    /// The log stream is readable again after [`Self::mark_stream_lost`].
    pub fn mark_stream_recovered(&self) {
        self.update(|state| {
            if !state.monitor_lost {
                return false;
            }
            state.status = Readiness::Starting;
            state.monitor_lost = false;
            state.last_line = None;
            true
        });
    }

    /// Wait until the model is ready.
    ///
    /// Fails with `NotReady` on timeout or when the model reports an error.
    /// A lost log stream does not end the wait, since it may recover.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_ready() || (s.status == Readiness::Errored && !s.monitor_lost)),
        )
        .await;

        match waited {
            Ok(Ok(state)) if state.is_ready() => Ok(()),
            Ok(Ok(state)) => Err(Error::NotReady(state.status)),
            Ok(Err(_)) | Err(_) => Err(Error::NotReady(self.status())),
        }
    }

    /// Apply `f`; when it reports a status change, stamp and publish it.
    fn update(&self, f: impl FnOnce(&mut ReadinessState) -> bool) {
        let mut published = None;
        self.state.send_if_modified(|state| {
            if !f(state) {
                return false;
            }
            state.changed_at = Utc::now();
            published = Some(state.clone());
            true
        });

        if let Some(state) = published {
            self.sink.record_readiness_transition(&state);
        }
    }
}
