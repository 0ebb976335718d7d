//! # Validator Lifecycle State Machine
//!
//! Single owned holder of the node's lifecycle state, with an ordered
//! transition log and a typed publish/subscribe observer list.
//!
//! ## States
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌───────────────────────┐
//! │ INITIALIZING │────▶│ SYNCING_LEDGER │────▶│ LISTENING_FOR_REVIEWS │
//! └──────┬───────┘     └───────┬────────┘     └──────────┬────────────┘
//!        │                     ▲                         │        ▲
//!        │                     │    (fell behind)        ▼        │
//!        │                     └──────────────── ┌────────────────┴──┐
//!        │                                       │  PRODUCING_BLOCK  │
//!        │                                       └───────┬───────────┘
//!        │                                               │
//!        ▼              (from any state)                 ▼
//!      ┌─────────────────────────────────────────────────────┐
//!      │                        FATAL                        │  (terminal)
//!      └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contract
//!
//! - [`ValidatorStateMachine::set_state`] performs the transition
//!   unconditionally. The machine trusts its caller to have validated
//!   preconditions (e.g. only leave `SyncingLedger` once the sync
//!   verifier reports synced). A transition outside the legality table
//!   is logged at WARN but never rejected.
//! - Transitions are serialized: the whole state swap, log append,
//!   metrics update, and observer notification happen under one guard,
//!   so observers see transitions in the order they occurred.
//! - Observers are invoked synchronously, in registration order, with
//!   `(previous, next)`. They must return promptly and must not call
//!   back into `set_state` (that would deadlock on the transition guard).
//! - Subscription returns an [`ObserverHandle`]; unsubscribing removes
//!   the observer, which then receives no further notifications.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::NodeMetrics;

// ════════════════════════════════════════════════════════════════════════════════
// STATE
// ════════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of the validator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorState {
    /// Sole entry state: configuration and identity checks.
    Initializing,
    /// Catching up with the external ledger; not ready to act.
    SyncingLedger,
    /// Synced and accepting work; waiting for an assigned slot.
    ListeningForReviews,
    /// Producing a block for an assigned slot.
    ProducingBlock,
    /// Terminal. Causes process termination with a distinguished exit
    /// status.
    Fatal,
}

impl ValidatorState {
    /// Wire/metrics name for the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::SyncingLedger => "SYNCING_LEDGER",
            Self::ListeningForReviews => "LISTENING_FOR_REVIEWS",
            Self::ProducingBlock => "PRODUCING_BLOCK",
            Self::Fatal => "FATAL",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

impl fmt::Display for ValidatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The documented legality table. Advisory only: `set_state` never
/// rejects, it logs transitions outside this table at WARN.
#[must_use]
pub fn legal_transition(from: ValidatorState, to: ValidatorState) -> bool {
    use ValidatorState::*;
    if to == Fatal {
        return true;
    }
    matches!(
        (from, to),
        (Initializing, SyncingLedger)
            | (SyncingLedger, ListeningForReviews)
            | (ListeningForReviews, ProducingBlock)
            | (ListeningForReviews, SyncingLedger)
            | (ProducingBlock, ListeningForReviews)
    )
}

/// One entry in the ordered transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ValidatorState,
    pub to: ValidatorState,
    /// Unix seconds when the transition occurred.
    pub at: u64,
}

// ════════════════════════════════════════════════════════════════════════════════
// OBSERVERS
// ════════════════════════════════════════════════════════════════════════════════

type Observer = Box<dyn Fn(ValidatorState, ValidatorState) + Send + Sync>;
type ObserverList = Arc<RwLock<Vec<(u64, Observer)>>>;

/// Disposer capability returned by [`ValidatorStateMachine::subscribe`].
///
/// Calling [`unsubscribe`](ObserverHandle::unsubscribe) removes the
/// observer. Dropping the handle without unsubscribing leaves the
/// observer registered for the machine's lifetime.
pub struct ObserverHandle {
    id: u64,
    observers: ObserverList,
}

impl ObserverHandle {
    /// Removes the observer. Idempotent.
    pub fn unsubscribe(self) {
        self.observers.write().retain(|(id, _)| *id != self.id);
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ════════════════════════════════════════════════════════════════════════════════

/// Owned holder of the process-wide validator state.
///
/// Shared by `Arc` with every component that reads or reacts to state.
/// Lives for the process lifetime; the log is never truncated.
pub struct ValidatorStateMachine {
    /// Serializes whole transitions (swap + log + notify).
    transition_guard: Mutex<()>,
    current: RwLock<ValidatorState>,
    log: RwLock<Vec<StateTransition>>,
    observers: ObserverList,
    next_observer_id: AtomicU64,
    metrics: Arc<NodeMetrics>,
}

impl ValidatorStateMachine {
    /// Creates a machine in `Initializing` with an empty log.
    #[must_use]
    pub fn new(metrics: Arc<NodeMetrics>) -> Self {
        Self {
            transition_guard: Mutex::new(()),
            current: RwLock::new(ValidatorState::Initializing),
            log: RwLock::new(Vec::new()),
            observers: Arc::new(RwLock::new(Vec::new())),
            next_observer_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ValidatorState {
        *self.current.read()
    }

    /// Transitions to `next` unconditionally.
    ///
    /// Appends to the transition log, publishes to metrics, and notifies
    /// every registered observer synchronously in registration order with
    /// `(previous, next)`. Returns the previous state.
    pub fn set_state(&self, next: ValidatorState, now: u64) -> ValidatorState {
        let _guard = self.transition_guard.lock();

        let previous = {
            let mut current = self.current.write();
            let previous = *current;
            *current = next;
            previous
        };

        if !legal_transition(previous, next) {
            warn!(
                event = "illegal_state_transition",
                from = %previous,
                to = %next,
                "state transition outside the legality table (accepted; caller-enforced legality)"
            );
        }

        self.log.write().push(StateTransition {
            from: previous,
            to: next,
            at: now,
        });
        self.metrics.record_state_transition(next.as_str());
        info!(event = "state_transition", from = %previous, to = %next);

        let observers = self.observers.read();
        for (_, observer) in observers.iter() {
            observer(previous, next);
        }

        previous
    }

    /// Registers an observer; returns its disposer handle.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(ValidatorState, ValidatorState) + Send + Sync + 'static,
    {
        let id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().push((id, Box::new(observer)));
        ObserverHandle {
            id,
            observers: Arc::clone(&self.observers),
        }
    }

    /// Snapshot of the ordered transition log (oldest first).
    #[must_use]
    pub fn transition_log(&self) -> Vec<StateTransition> {
        self.log.read().clone()
    }
}

impl fmt::Debug for ValidatorStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorStateMachine")
            .field("current", &self.state())
            .field("log_len", &self.log.read().len())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COMPILE-TIME ASSERTIONS
// ════════════════════════════════════════════════════════════════════════════════

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<ValidatorStateMachine>();
    }
    let _ = check;
};

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
