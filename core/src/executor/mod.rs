//! Script execution state machine
//!
//! [`Executor`] owns the READY/RUNNING/PAUSED/HALTING state of a script run
//! and the script thread that advances it. The host thread keeps calling
//! [`Primitives::update`] every presentation frame; everything else here may
//! be called from any thread.
//!
//! | From | Request | To |
//! |------|---------|----|
//! | READY | `run` | RUNNING |
//! | RUNNING | `pause` | PAUSED |
//! | PAUSED | `resume` / `run` | RUNNING |
//! | RUNNING, PAUSED | `stop` / `exit` | HALTING, then READY |
//!
//! Any other request is a no-op that returns false.

pub(crate) mod context;
mod runner;
mod state;


use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::debug::{DebugSession, Inspection, InspectionReply, Record, Step};
use crate::error::EngineError;
use crate::host::Host;
use crate::lock;
use crate::observer::Observer;
use crate::primitives::Primitives;
use crate::require::{Modules, Program};
use crate::timeout::TimeoutMonitor;
use crate::vm::{Value, VmFactory};

use context::{FocusChange, ScriptContext};
use runner::ScriptRunner;

pub use runner::{
    FOCUS_GAINED_FUNCTION, FOCUS_LOST_FUNCTION, QUIT_FUNCTION, RENDERER_RESET_FUNCTION, SETUP_FUNCTION,
    UPDATE_FUNCTION,
};
pub use state::ExecutionState;

/// Runs one program at a time and exposes its debugger
pub struct Executor {
    config: EngineConfig,
    ctx: Arc<ScriptContext>,
    primitives: Arc<Primitives>,
    program: Arc<dyn Program>,
    factory: VmFactory,
    /// Script thread of the current or last run (threaded mode)
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Runner driven by [`update`](Self::update) (single-threaded mode)
    local: Mutex<Option<ScriptRunner>>,
}

impl Executor {
    /// Creates an executor over `host`.
    ///
    /// With `config.script.threaded` set, scripts run on their own thread and
    /// commands are buffered until the host's next
    /// [`Primitives::update`]; otherwise scripts run inside
    /// [`update`](Self::update) and commands apply immediately.
    pub fn new(
        config: EngineConfig,
        host: Box<dyn Host>,
        program: Arc<dyn Program>,
        factory: VmFactory,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let threaded = config.script.threaded;
        let primitives = if threaded {
            Primitives::threaded_with_interval(host, config.debug.sync_interval())
        } else {
            Primitives::immediate(host)
        };
        let ctx = ScriptContext::new(
            DebugSession::new(config.debug.wait_interval()),
            TimeoutMonitor::new(config.script.timeout_ns),
            observer,
            threaded,
        );
        Self {
            config,
            ctx: Arc::new(ctx),
            primitives,
            program,
            factory,
            thread: Mutex::new(None),
            local: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn primitives(&self) -> &Arc<Primitives> {
        &self.primitives
    }

    pub fn state(&self) -> ExecutionState {
        self.ctx.state()
    }

    pub fn is_threaded(&self) -> bool {
        self.ctx.debuggable
    }

    /// Frames per second of the script loop, averaged over a few seconds
    pub fn fps(&self) -> u32 {
        self.ctx.fps()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Starts a run from READY, or resumes a paused one.
    ///
    /// Returns `Ok(false)` when already running or halting, or when the
    /// program could not be set up in single-threaded mode.
    pub fn run(&self) -> Result<bool> {
        match self.ctx.state() {
            ExecutionState::Ready => {}
            ExecutionState::Paused => return Ok(self.resume()),
            ExecutionState::Running | ExecutionState::Halting => return Ok(false),
        }
        if self.is_threaded() {
            self.spawn()
        } else {
            Ok(self.run_local())
        }
    }

    fn modules(&self) -> Arc<Modules> {
        Arc::new(Modules::new(
            Arc::clone(&self.program),
            Arc::clone(&self.ctx.observer),
            self.config.script.script_extension.clone(),
        ))
    }

    fn spawn(&self) -> Result<bool> {
        let mut slot = lock(&self.thread);
        if let Some(stale) = slot.take()
            && stale.join().is_err()
        {
            error!("previous script thread panicked");
        }
        if !self.ctx.transition(ExecutionState::Ready, ExecutionState::Running) {
            return Ok(false);
        }

        let ctx = Arc::clone(&self.ctx);
        let primitives = Arc::clone(&self.primitives);
        let modules = self.modules();
        let factory = Arc::clone(&self.factory);
        let startup_delay = self.config.debug.startup_delay();
        let frame_duration = self.config.script.frame_duration();

        let spawned = thread::Builder::new()
            .name("script".into())
            .spawn(move || {
                // Give the host a frame to settle before the first command
                thread::sleep(startup_delay);
                let mut runner = ScriptRunner::new(factory(), Arc::clone(&ctx), primitives, modules);
                let ran = panic::catch_unwind(AssertUnwindSafe(|| {
                    if ctx.state().is_active() && runner.setup() {
                        runner.run_loop(frame_duration);
                    }
                }));
                if ran.is_err() {
                    error!("script thread panicked");
                    ctx.observer.error("Script engine panicked.");
                }
                ctx.set_state(ExecutionState::Halting);
                runner.finish();
                ctx.set_state(ExecutionState::Ready);
                ctx.observer.stop();
            })
            .map_err(EngineError::ThreadSpawn)
            .context("failed to start script run");

        match spawned {
            Ok(handle) => {
                info!("script run started");
                *slot = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.ctx.set_state(ExecutionState::Ready);
                Err(e)
            }
        }
    }

    fn run_local(&self) -> bool {
        if !self.ctx.transition(ExecutionState::Ready, ExecutionState::Running) {
            return false;
        }
        let mut runner = ScriptRunner::new(
            (self.factory)(),
            Arc::clone(&self.ctx),
            Arc::clone(&self.primitives),
            self.modules(),
        );
        if !runner.setup() {
            self.finish_local(runner);
            return false;
        }
        *lock(&self.local) = Some(runner);
        true
    }

    fn finish_local(&self, mut runner: ScriptRunner) {
        self.ctx.set_state(ExecutionState::Halting);
        runner.finish();
        self.ctx.set_state(ExecutionState::Ready);
        self.ctx.observer.stop();
    }

    /// Advances a single-threaded run by one frame.
    ///
    /// Returns whether a run is still in progress. Does nothing in threaded
    /// mode, where the script thread paces itself.
    pub fn update(&self, delta: f64) -> bool {
        if self.is_threaded() {
            return self.ctx.state() != ExecutionState::Ready;
        }
        let mut local = lock(&self.local);
        match self.ctx.state() {
            ExecutionState::Running => {
                let Some(runner) = local.as_mut() else {
                    return false;
                };
                if runner.cycle(delta) {
                    return true;
                }
            }
            ExecutionState::Paused => return true,
            ExecutionState::Halting => {}
            ExecutionState::Ready => return false,
        }
        let runner = local.take();
        drop(local);
        if let Some(runner) = runner {
            self.finish_local(runner);
        }
        false
    }

    /// Requests the run to end and waits for the script thread to finish.
    ///
    /// Returns true if a stop was requested or a finished script thread was
    /// reclaimed.
    pub fn stop(&self) -> bool {
        let requested = self.request_halt();
        if !self.is_threaded() {
            let runner = lock(&self.local).take();
            let Some(runner) = runner else {
                return requested;
            };
            self.finish_local(runner);
            return true;
        }

        let Some(handle) = lock(&self.thread).take() else {
            return requested;
        };
        // The script may be parked in sync waiting for a frame that never comes
        self.primitives.forbid();
        if handle.join().is_err() {
            error!("script thread panicked");
            self.ctx.session.reset();
            self.ctx.set_state(ExecutionState::Ready);
        }
        self.primitives.reset();
        true
    }

    /// Requests the run to end without waiting for it
    pub fn exit(&self) -> bool {
        self.request_halt()
    }

    fn request_halt(&self) -> bool {
        let requested = self.ctx.transition(ExecutionState::Running, ExecutionState::Halting)
            || self.ctx.transition(ExecutionState::Paused, ExecutionState::Halting);
        if requested {
            info!("script halt requested");
        }
        requested
    }

    pub fn pause(&self) -> bool {
        let paused = self.ctx.transition(ExecutionState::Running, ExecutionState::Paused);
        if paused {
            debug!("script pause requested");
        }
        paused
    }

    /// Continues a paused run; pending step requests are dropped
    pub fn resume(&self) -> bool {
        if self.ctx.state() != ExecutionState::Paused {
            return false;
        }
        self.ctx.session.reset_steps();
        let resumed = self.ctx.transition(ExecutionState::Paused, ExecutionState::Running);
        if resumed {
            debug!("script resumed");
        }
        resumed
    }

    fn step(&self, step: Step) -> bool {
        if !self.is_threaded() || self.ctx.state() != ExecutionState::Paused {
            return false;
        }
        debug!(?step, "step requested");
        self.ctx.session.request_step(step);
        true
    }

    /// Runs to the next line of the current function
    pub fn step_over(&self) -> bool {
        self.step(Step::Over)
    }

    /// Runs to the next line, entering calls
    pub fn step_into(&self) -> bool {
        self.step(Step::Into)
    }

    /// Runs until the current function returns to its caller
    pub fn step_out(&self) -> bool {
        self.step(Step::Out)
    }

    /// Stops any run and forgets all breakpoints
    pub fn close(&self) {
        self.stop();
        self.ctx.session.clear_breakpoints(None);
    }

    // ========================================================================
    // Host events
    // ========================================================================

    /// The host window lost focus; `focusLost` runs after the next frame
    pub fn focus_lost(&self) {
        self.ctx.post(|events| events.focus = Some(FocusChange::Lost));
    }

    /// The host window gained focus; `focusGained` runs after the next frame
    pub fn focus_gained(&self) {
        self.ctx.post(|events| events.focus = Some(FocusChange::Gained));
    }

    /// Render targets were lost; `rendererReset` runs after the next frame
    pub fn renderer_targets_reset(&self) {
        self.ctx.post(|events| events.renderer_reset = true);
    }

    // ========================================================================
    // Timeout
    // ========================================================================

    /// Execution budget in nanoseconds, -1 when disabled
    pub fn timeout(&self) -> i64 {
        self.ctx.timeout.timeout()
    }

    pub fn set_timeout(&self, ns: i64) {
        self.ctx.timeout.set_timeout(ns);
    }

    /// Refreshes the activity timestamp, e.g. after a long host-side call
    pub fn activate(&self) {
        self.ctx.timeout.activate();
    }

    // ========================================================================
    // Debugger
    // ========================================================================

    pub fn get_breakpoints(&self, source: Option<&str>, visitor: impl FnMut(&str, i32)) -> usize {
        self.ctx.session.get_breakpoints(source, visitor)
    }

    pub fn set_breakpoint(&self, source: &str, line: i32, on: bool) -> bool {
        self.ctx.session.set_breakpoint(source, line, on)
    }

    pub fn clear_breakpoints(&self, source: Option<&str>) -> usize {
        self.ctx.session.clear_breakpoints(source)
    }

    /// Visits the call stack captured at the current pause, innermost first
    pub fn get_records(&self, visitor: impl FnMut(&Record)) -> usize {
        self.ctx.session.get_records(visitor)
    }

    pub fn records(&self) -> Vec<Record> {
        self.ctx.session.records()
    }

    /// Type name and value of the innermost local called `name`.
    ///
    /// Only answers while the script is parked at a pause.
    pub fn get_variable(&self, name: &str) -> Option<(String, Value)> {
        if self.ctx.state() != ExecutionState::Paused {
            return None;
        }
        match self.ctx.session.inspect(Inspection::Get(name.to_string())) {
            Some(InspectionReply::Get(found)) => found,
            _ => None,
        }
    }

    /// Assigns the innermost local called `name`, or the global of that
    /// name when no frame has such a local.
    ///
    /// Only works while the script is parked at a pause.
    pub fn set_variable(&self, name: &str, value: Value) -> bool {
        if self.ctx.state() != ExecutionState::Paused {
            return false;
        }
        matches!(
            self.ctx.session.inspect(Inspection::Set(name.to_string(), value)),
            Some(InspectionReply::Set(true))
        )
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}
