//! Execution state of the script loop

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a script run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecutionState {
    /// No script is running
    Ready = 0,
    /// Script is progressing
    Running = 1,
    /// Script is parked at a breakpoint or step target
    Paused = 2,
    /// Stop requested, script is unwinding
    Halting = 3,
}

impl ExecutionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Halting,
            _ => Self::Ready,
        }
    }

    /// Whether a run is in progress (running or paused)
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Halting => "HALTING",
        })
    }
}

/// Lock-free cell holding an [`ExecutionState`]
#[derive(Debug)]
pub(crate) struct AtomicExecutionState(AtomicU8);

impl Default for AtomicExecutionState {
    fn default() -> Self {
        Self::new(ExecutionState::Ready)
    }
}

impl AtomicExecutionState {
    pub fn new(state: ExecutionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ExecutionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from` to `to`; returns false if the state was not `from`
    pub fn transition(&self, from: ExecutionState, to: ExecutionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
