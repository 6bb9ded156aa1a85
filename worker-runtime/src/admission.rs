//! Per-route admission control.
//!
//! Every route owns an independent slot holding its capacity counters and
//! wait queue behind its own lock, so contention on one route never blocks
//! another. The lock is only held for bookkeeping, never across an await.
//!
//! Routes that allow parallel requests are admitted immediately while the
//! model is ready; their workload cost is tracked for accounting only.
//! Routes that do not allow parallel requests admit one request at a time and
//! queue the rest in FIFO order, each waiting at most the route's
//! `max_queue_time`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use worker_common::{CapacitySnapshot, OutcomeKind, Readiness};

use crate::error::Error;
use crate::readiness::ReadinessMonitor;
use crate::routes::{HandlerSpec, RouteRegistry};

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Model is not ready (state: {0})")]
    NotReady(Readiness),

    #[error("Request waited {0:?} in queue without being admitted")]
    QueueTimeout(Duration),
}

impl Rejection {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Rejection::UnknownRoute(_) => OutcomeKind::UnknownRoute,
            Rejection::NotReady(_) => OutcomeKind::NotReady,
            Rejection::QueueTimeout(_) => OutcomeKind::QueueTimeout,
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::UnknownRoute(route) => Error::UnknownRoute(route),
            Rejection::NotReady(status) => Error::NotReady(status),
            Rejection::QueueTimeout(waited) => Error::QueueTimeout(waited),
        }
    }
}

/// Proof of admission. Releasing it (explicitly or by dropping it) returns
/// the capacity to the route exactly once.
#[must_use = "dropping the token releases the admission immediately"]
pub struct AdmissionToken {
    slot: Option<Arc<RouteSlot>>,
    cost: f64,
    waited: Duration,
}

impl AdmissionToken {
    pub fn route(&self) -> &str {
        self.slot.as_ref().map_or("", |slot| slot.spec.route())
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Time spent queued before admission.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn release(self) {
        drop(self);
    }

    /// Forget the slot without touching its counters. Used while the slot
    /// lock is already held.
    fn disarm(&mut self) {
        self.slot = None;
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.release(self.cost);
        }
    }
}

impl std::fmt::Debug for AdmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionToken")
            .field("route", &self.route())
            .field("cost", &self.cost)
            .field("waited", &self.waited)
            .finish()
    }
}

/// A request waiting for a non-parallel route to become free.
struct Waiter {
    ticket: u64,
    cost: f64,
    enqueued_at: Instant,
    grant: oneshot::Sender<AdmissionToken>,
}

#[derive(Default)]
struct SlotState {
    in_flight: usize,
    workload_total: f64,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

struct RouteSlot {
    spec: Arc<HandlerSpec>,
    state: Mutex<SlotState>,
}

impl RouteSlot {
    fn new(spec: Arc<HandlerSpec>) -> Self {
        Self {
            spec,
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Account for an admission and mint its token. Caller holds the lock.
    fn admit_locked(self: &Arc<Self>, state: &mut SlotState, cost: f64, waited: Duration) -> AdmissionToken {
        state.in_flight += 1;
        state.workload_total += cost;
        AdmissionToken {
            slot: Some(self.clone()),
            cost,
            waited,
        }
    }

    fn undo_locked(state: &mut SlotState, cost: f64) {
        state.in_flight = state.in_flight.saturating_sub(1);
        state.workload_total -= cost;
        if state.in_flight == 0 || state.workload_total < 0.0 {
            // Drop accumulated floating point drift.
            state.workload_total = 0.0;
        }
    }

    fn release(self: &Arc<Self>, cost: f64) {
        let mut state = self.lock();
        Self::undo_locked(&mut state, cost);
        if !self.spec.is_parallel() {
            self.grant_next(&mut state);
        }
    }

    /// Hand the free slot to the earliest waiter that is still listening.
    fn grant_next(self: &Arc<Self>, state: &mut SlotState) {
        while state.in_flight == 0 {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            let token = self.admit_locked(state, waiter.cost, waiter.enqueued_at.elapsed());
            if let Err(mut token) = waiter.grant.send(token) {
                // The waiter went away; take the admission back.
                token.disarm();
                Self::undo_locked(state, waiter.cost);
            }
        }
    }

    /// Remove a waiter. Returns false if it was already granted or gone.
    fn remove_waiter(&self, ticket: u64) -> bool {
        let mut state = self.lock();
        match state.waiters.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                state.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> CapacitySnapshot {
        let state = self.lock();
        CapacitySnapshot {
            in_flight: state.in_flight,
            workload_total: state.workload_total,
            queued: state.waiters.len(),
        }
    }
}

/// Removes a queued ticket if the waiting future is dropped early.
struct QueuedTicket {
    slot: Arc<RouteSlot>,
    ticket: u64,
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        self.slot.remove_waiter(self.ticket);
    }
}

/// Decides whether requests may proceed to the model server.
pub struct AdmissionController {
    slots: HashMap<String, Arc<RouteSlot>>,
    readiness: Arc<ReadinessMonitor>,
}

impl AdmissionController {
    pub fn new(registry: &RouteRegistry, readiness: Arc<ReadinessMonitor>) -> Self {
        let slots = registry
            .routes()
            .map(|spec| (spec.route().to_string(), Arc::new(RouteSlot::new(spec.clone()))))
            .collect();
        Self { slots, readiness }
    }

    /// Admit a request, wait for capacity, or reject it.
    pub async fn try_admit(&self, route: &str, payload: &Value) -> Result<AdmissionToken, Rejection> {
        let slot = self
            .slots
            .get(route)
            .ok_or_else(|| Rejection::UnknownRoute(route.to_string()))?;

        let status = self.readiness.status();
        if !status.is_ready() {
            return Err(Rejection::NotReady(status));
        }

        let cost = slot.spec.cost(payload);

        if slot.spec.is_parallel() {
            let mut state = slot.lock();
            return Ok(slot.admit_locked(&mut state, cost, Duration::ZERO));
        }

        let (ticket, grant) = {
            let mut state = slot.lock();
            if state.in_flight == 0 && state.waiters.is_empty() {
                return Ok(slot.admit_locked(&mut state, cost, Duration::ZERO));
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                ticket,
                cost,
                enqueued_at: Instant::now(),
                grant: tx,
            });
            tracing::debug!(
                route = %route,
                queued = state.waiters.len(),
                "Route busy, request queued"
            );
            // Covers a slot that went idle without anyone to hand it to.
            slot.grant_next(&mut state);
            (ticket, rx)
        };

        self.wait_for_grant(slot, ticket, grant).await
    }

    async fn wait_for_grant(
        &self,
        slot: &Arc<RouteSlot>,
        ticket: u64,
        mut grant: oneshot::Receiver<AdmissionToken>,
    ) -> Result<AdmissionToken, Rejection> {
        let queued = QueuedTicket {
            slot: slot.clone(),
            ticket,
        };
        let max_wait = slot.spec.max_queue_time();
        let mut readiness = self.readiness.subscribe();
        let deadline = tokio::time::sleep(max_wait);
        tokio::pin!(deadline);

        let ready_now = readiness.borrow().is_ready();
        let outcome = if ready_now {
            loop {
                tokio::select! {
                    biased;
                    granted = &mut grant => {
                        break granted.map_err(|_| Rejection::QueueTimeout(max_wait));
                    }
                    _ = &mut deadline => break Err(Rejection::QueueTimeout(max_wait)),
                    changed = readiness.changed() => {
                        let status = self.readiness.status();
                        if changed.is_err() || !status.is_ready() {
                            break Err(Rejection::NotReady(status));
                        }
                    }
                }
            }
        } else {
            Err(Rejection::NotReady(self.readiness.status()))
        };

        let token = match outcome {
            Ok(token) => token,
            Err(rejection) => {
                if slot.remove_waiter(ticket) {
                    return Err(rejection);
                }
                // Granted while we were giving up; the token is in the channel.
                match grant.try_recv() {
                    Ok(token) => token,
                    Err(_) => return Err(rejection),
                }
            }
        };
        drop(queued);

        let status = self.readiness.status();
        if !status.is_ready() {
            // Dropping the token hands the slot to the next waiter.
            drop(token);
            return Err(Rejection::NotReady(status));
        }

        tracing::debug!(
            route = %slot.spec.route(),
            waited_ms = token.waited().as_millis() as u64,
            "Queued request admitted"
        );
        Ok(token)
    }

    /// Return an admission's capacity. Equivalent to dropping the token.
    pub fn release(&self, token: AdmissionToken) {
        token.release();
    }

    pub fn capacity(&self, route: &str) -> Option<CapacitySnapshot> {
        self.slots.get(route).map(|slot| slot.snapshot())
    }

    /// Capacity of every route, sorted by route.
    pub fn snapshot(&self) -> Vec<(String, CapacitySnapshot)> {
        let mut all: Vec<_> = self
            .slots
            .iter()
            .map(|(route, slot)| (route.clone(), slot.snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
