//! VM hooks driving breakpoints, stepping and cancellation
//!
//! While running, only line events are hooked: they check breakpoints, the
//! timeout budget and stop requests. Once the user starts stepping the hook
//! switches to call, return and line events and resolves step requests by
//! comparing the active frame to the scope captured when stepping began.

use std::sync::Arc;

use tracing::{debug, info};

use super::record::capture_records;
use super::scope::Scope;
use super::session::Step;
use crate::error::ScriptError;
use crate::executor::context::ScriptContext;
use crate::executor::ExecutionState;
use crate::vm::{Hook, HookEvent, HookMask, Introspect};

/// Which events a [`DebugHook`] reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookMode {
    /// Breakpoints, timeout and stop requests on every line
    Normal,
    /// Step resolution on call, return and line events
    Break,
    /// Timeout only, while the quit callback runs
    Quit,
}

impl HookMode {
    pub fn mask(self) -> HookMask {
        match self {
            Self::Normal | Self::Quit => HookMask::LINE,
            Self::Break => HookMask::CALL | HookMask::RETURN | HookMask::LINE,
        }
    }
}

pub(crate) struct DebugHook {
    ctx: Arc<ScriptContext>,
    mode: HookMode,
}

impl DebugHook {
    pub fn new(ctx: Arc<ScriptContext>, mode: HookMode) -> Self {
        Self { ctx, mode }
    }

    fn on_normal(&self, vm: &mut dyn Introspect) -> Result<(), ScriptError> {
        let ctx = &self.ctx;
        if ctx.debuggable
            && let Some(frame) = vm.frame(0)
        {
            let hit = ctx.session.has_breakpoint(&frame.source, frame.line)
                && ctx.transition(ExecutionState::Running, ExecutionState::Paused);
            // A pause requested mid-frame stops at the next line
            let requested = !hit && ctx.state() == ExecutionState::Paused;
            if hit || requested {
                debug!(source = %frame.source, line = frame.line, hit, "script paused");
                self.wait(vm, &frame.source, frame.line);
                if ctx.session.steps().any() {
                    ctx.install_hook(vm, HookMode::Break);
                }
            }
        }

        self.check_timeout()?;
        self.check_halting(vm)
    }

    fn on_break(&self, event: HookEvent, vm: &mut dyn Introspect) -> Result<(), ScriptError> {
        let active = Scope::capture(vm, 0);
        if active.is_native() {
            return Ok(());
        }

        let session = &self.ctx.session;
        match event {
            HookEvent::Call => {
                let steps = session.steps();
                if steps.over {
                    if session.scope() == active {
                        session.clear_step(Step::Over);
                        self.wait(vm, &active.source, active.line);
                    }
                } else if steps.into {
                    session.clear_step(Step::Into);
                    self.wait(vm, &active.source, active.line);
                }
            }
            HookEvent::Return => {
                let steps = session.steps();
                if steps.over {
                    if session.scope() == active {
                        session.clear_step(Step::Over);
                        self.wait(vm, &active.source, active.line);
                        session.set_scope(Scope::capture(vm, 1));
                    }
                } else if steps.out {
                    let scope = session.scope();
                    if scope == active {
                        session.clear_step(Step::Out);
                        self.wait(vm, &active.source, active.line);
                        session.set_scope(Scope::capture(vm, 1));
                    } else if scope.is_empty() {
                        // Nothing to step out to, stop at the next event instead
                        session.clear_step(Step::Out);
                        session.request_step(Step::Into);
                    }
                }
            }
            HookEvent::Line => self.on_break_line(vm, &active),
        }

        // Resumed without a step: back to plain line checks
        if !session.steps().any() && self.ctx.state() == ExecutionState::Running {
            self.ctx.install_hook(vm, HookMode::Normal);
        }
        self.check_halting(vm)
    }

    fn on_break_line(&self, vm: &mut dyn Introspect, active: &Scope) {
        let ctx = &self.ctx;
        let session = &ctx.session;

        let steps = session.steps();
        if steps.over {
            let scope = session.scope();
            if scope.is_empty() || scope == *active {
                session.clear_step(Step::Over);
                self.wait(vm, &active.source, active.line);
                return;
            }
        } else if steps.into {
            session.clear_step(Step::Into);
            self.wait(vm, &active.source, active.line);
            return;
        } else if steps.out && session.scope() == *active {
            // Back in the caller
            session.clear_step(Step::Out);
            self.wait(vm, &active.source, active.line);
            return;
        }

        if !session.has_breakpoint(&active.source, active.line) {
            return;
        }
        // Breakpoints win over in-flight steps, except a step over that is
        // still inside its own frame
        if session.steps().over {
            if session.scope() == *active {
                return;
            }
            session.clear_step(Step::Over);
        } else {
            session.clear_step(Step::Out);
        }
        ctx.transition(ExecutionState::Running, ExecutionState::Paused);
        self.wait(vm, &active.source, active.line);
    }

    /// Captures records, focuses the top frame and parks the script thread
    /// until a step is requested or the state leaves PAUSED
    fn wait(&self, vm: &mut dyn Introspect, source_hint: &str, line_hint: i32) {
        let ctx = &self.ctx;
        let session = &ctx.session;

        session.set_records(capture_records(vm, source_hint, line_hint));
        if let Some((source, line)) = session.focus() {
            ctx.observer.focus(&source, line);
        }

        session.set_serving(true);
        loop {
            let seen = session.generation();
            session.serve(vm);
            if session.steps().any() || ctx.state() != ExecutionState::Paused {
                break;
            }
            session.wait_for_change(seen, session.wait_interval());
        }
        session.set_serving(false);

        let steps = session.steps();
        let scope = if steps.over {
            Scope::capture(vm, 0)
        } else if steps.out {
            Scope::capture(vm, 1)
        } else {
            Scope::empty()
        };
        session.set_scope(scope);
        session.clear_records();
        // Time spent parked does not count against the budget
        ctx.timeout.activate();
    }

    fn check_timeout(&self) -> Result<(), ScriptError> {
        if self.ctx.timeout.expired() {
            info!(idle = ?self.ctx.timeout.idle(), "script timed out");
            return Err(ScriptError::timeout());
        }
        Ok(())
    }

    fn check_halting(&self, vm: &mut dyn Introspect) -> Result<(), ScriptError> {
        if self.ctx.state() == ExecutionState::Halting {
            vm.set_hook(None, HookMask::empty());
            return Err(ScriptError::user_abort());
        }
        Ok(())
    }
}

impl Hook for DebugHook {
    fn on_event(&self, event: HookEvent, vm: &mut dyn Introspect) -> Result<(), ScriptError> {
        match self.mode {
            HookMode::Normal => self.on_normal(vm),
            HookMode::Break => self.on_break(event, vm),
            HookMode::Quit => self.check_timeout(),
        }
    }
}
