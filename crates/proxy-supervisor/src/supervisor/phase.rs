//! Connection phase and its transition table.

use crate::error::SupervisorError;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of the tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Connecting,
            2 => Phase::Connected,
            3 => Phase::Failed,
            _ => Phase::Idle,
        }
    }

    /// Whether `self -> to` is an allowed transition.
    pub fn can_transition_to(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Idle, Phase::Connecting)
                | (Phase::Connecting, Phase::Connected)
                | (Phase::Connecting, Phase::Idle)
                | (Phase::Connecting, Phase::Failed)
                | (Phase::Connected, Phase::Idle)
                | (Phase::Connected, Phase::Failed)
                | (Phase::Failed, Phase::Connecting)
                | (Phase::Failed, Phase::Idle)
        )
    }

    /// Control API encoding: 1 connected, -1 connecting, 0 otherwise.
    /// Failed is reported as disconnected.
    pub fn run_status(self) -> i32 {
        match self {
            Phase::Connected => 1,
            Phase::Connecting => -1,
            Phase::Idle | Phase::Failed => 0,
        }
    }
}

/// Atomic phase cell. Transitions are compare-and-swap against the
/// expected current phase.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self(AtomicU8::new(Phase::Idle as u8))
    }
}

impl PhaseCell {
    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Fails if the move is not in the table or
    /// the cell no longer holds `from`.
    pub fn transition(&self, from: Phase, to: Phase) -> Result<(), SupervisorError> {
        if !from.can_transition_to(to) {
            return Err(SupervisorError::InvalidTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| SupervisorError::InvalidTransition {
                from: Phase::from_u8(current),
                to,
            })
    }

    /// Walk whatever phase is current back to Idle through allowed edges.
    pub fn settle_idle(&self) -> Phase {
        loop {
            let current = self.load();
            if current == Phase::Idle || self.transition(current, Phase::Idle).is_ok() {
                return current;
            }
        }
    }
}
