use crate::timer::RecoveryTimer;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Represents the local state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum CircuitState {
    /// Requests pass through.
    Closed = 0,
    /// The backend is tripped; the caller rejects requests.
    Open = 1,
    /// One trial request may go through.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Lower-case label, used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change that actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: CircuitState,
    pub(crate) to: CircuitState,
    /// Epoch the circuit entered with this transition.
    pub(crate) epoch: u64,
}

/// Local state machine of one circuit.
///
/// Every transition bumps `epoch`. Work scheduled for a given epoch (the
/// recovery timer, a bootstrap read) compares it against the current one
/// before acting, so late completions never override fresher decisions.
pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    half_open_call_pending: Arc<AtomicBool>,
    epoch: u64,
    recovery: Option<RecoveryTimer>,
    last_state_change: Instant,
}

impl Circuit {
    pub(crate) fn new(state_atomic: Arc<AtomicU8>, half_open_call_pending: Arc<AtomicBool>) -> Self {
        state_atomic.store(CircuitState::Closed as u8, Ordering::Release);
        Self {
            state: CircuitState::Closed,
            state_atomic,
            half_open_call_pending,
            epoch: 0,
            recovery: None,
            last_state_change: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn time_in_state(&self) -> Duration {
        self.last_state_change.elapsed()
    }

    pub(crate) fn recovery_pending(&self) -> bool {
        self.recovery.is_some()
    }

    /// Enters OPEN. The caller arms the recovery timer for the returned epoch.
    pub(crate) fn open_state(&mut self) -> Option<Transition> {
        self.transition_to(CircuitState::Open)
    }

    /// Enters CLOSED and clears the half-open trial flag.
    pub(crate) fn close_state(&mut self) -> Option<Transition> {
        self.transition_to(CircuitState::Closed)
    }

    pub(crate) fn half_open_state(&mut self) -> Option<Transition> {
        self.transition_to(CircuitState::HalfOpen)
    }

    /// Stores the timer for the current OPEN episode, replacing (and
    /// cancelling) any previous one.
    pub(crate) fn arm_recovery(&mut self, timer: RecoveryTimer) {
        if let Some(previous) = self.recovery.replace(timer) {
            previous.cancel();
        }
    }

    /// Atomically marks the trial call as taken, only while HALF_OPEN.
    pub(crate) fn claim_half_open_call(&mut self) -> bool {
        if self.state() != CircuitState::HalfOpen {
            return false;
        }
        !self.half_open_call_pending.swap(true, Ordering::AcqRel)
    }

    /// Sets the trial flag by hand. A CLOSED circuit keeps it cleared.
    pub(crate) fn set_half_open_call_pending(&mut self, pending: bool) {
        if pending && self.state == CircuitState::Closed {
            return;
        }
        self.half_open_call_pending.store(pending, Ordering::Release);
    }

    pub(crate) fn cancel_recovery(&mut self) {
        if let Some(timer) = self.recovery.take() {
            timer.cancel();
        }
    }

    fn transition_to(&mut self, state: CircuitState) -> Option<Transition> {
        if self.state == state {
            return None;
        }

        let from = self.state;
        if from == CircuitState::Open {
            self.cancel_recovery();
        }
        if state == CircuitState::Closed {
            self.half_open_call_pending.store(false, Ordering::Release);
        }

        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);
        self.epoch += 1;
        self.last_state_change = Instant::now();

        Some(Transition {
            from,
            to: state,
            epoch: self.epoch,
        })
    }
}
