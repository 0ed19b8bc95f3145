//! State shared by the executor, the script thread and the hooks

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use super::state::{AtomicExecutionState, ExecutionState};
use crate::debug::hook::{DebugHook, HookMode};
use crate::debug::DebugSession;
use crate::lock;
use crate::observer::Observer;
use crate::timeout::TimeoutMonitor;
use crate::vm::Introspect;

/// Window focus change, the latest one wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FocusChange {
    Lost,
    Gained,
}

/// Host events delivered to the script between frames
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEvents {
    pub focus: Option<FocusChange>,
    pub renderer_reset: bool,
}

pub(crate) struct ScriptContext {
    state: AtomicExecutionState,
    pub session: DebugSession,
    pub timeout: TimeoutMonitor,
    pub observer: Arc<dyn Observer>,
    /// Breakpoints and stepping park the script thread; off when the
    /// script runs on the host thread
    pub debuggable: bool,
    fps: AtomicU32,
    events: Mutex<PendingEvents>,
}

impl ScriptContext {
    pub fn new(
        session: DebugSession,
        timeout: TimeoutMonitor,
        observer: Arc<dyn Observer>,
        debuggable: bool,
    ) -> Self {
        Self {
            state: AtomicExecutionState::default(),
            session,
            timeout,
            observer,
            debuggable,
            fps: AtomicU32::new(0),
            events: Mutex::new(PendingEvents::default()),
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    /// Stores a state and wakes anything parked on the session
    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
        self.session.notify();
    }

    pub fn transition(&self, from: ExecutionState, to: ExecutionState) -> bool {
        let moved = self.state.transition(from, to);
        if moved {
            self.session.notify();
        }
        moved
    }

    pub fn install_hook(self: &Arc<Self>, vm: &mut dyn Introspect, mode: HookMode) {
        let hook = DebugHook::new(Arc::clone(self), mode);
        vm.set_hook(Some(Arc::new(hook)), mode.mask());
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    pub fn set_fps(&self, fps: u32) {
        self.fps.store(fps, Ordering::Relaxed);
    }

    pub fn post(&self, f: impl FnOnce(&mut PendingEvents)) {
        f(&mut lock(&self.events));
    }

    pub fn take_events(&self) -> PendingEvents {
        std::mem::take(&mut *lock(&self.events))
    }
}
