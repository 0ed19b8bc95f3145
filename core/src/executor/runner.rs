//! Script side of a run: setup, per-frame cycle and teardown
//!
//! A [`ScriptRunner`] owns the VM for one run. In threaded mode it lives on
//! the script thread and drives [`run_loop`](ScriptRunner::run_loop); in
//! single-threaded mode the executor keeps it and calls
//! [`cycle`](ScriptRunner::cycle) from the host's update.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::ExecutionState;
use super::context::{FocusChange, ScriptContext};
use crate::debug::Step;
use crate::debug::hook::HookMode;
use crate::error::ScriptError;
use crate::primitives::Primitives;
use crate::require::Modules;
use crate::vm::{ScriptVm, Value};

pub const SETUP_FUNCTION: &str = "setup";
pub const UPDATE_FUNCTION: &str = "update";
pub const QUIT_FUNCTION: &str = "quit";
pub const FOCUS_LOST_FUNCTION: &str = "focusLost";
pub const FOCUS_GAINED_FUNCTION: &str = "focusGained";
pub const RENDERER_RESET_FUNCTION: &str = "rendererReset";

/// Window over which the frame rate is averaged
const FPS_INTERVAL: Duration = Duration::from_secs(3);

/// Lifecycle functions the main chunk defined
#[derive(Debug, Default, Clone, Copy)]
struct Callbacks {
    update: bool,
    quit: bool,
    focus_lost: bool,
    focus_gained: bool,
    renderer_reset: bool,
}

impl Callbacks {
    fn detect(vm: &dyn ScriptVm) -> Self {
        Self {
            update: vm.has_function(UPDATE_FUNCTION),
            quit: vm.has_function(QUIT_FUNCTION),
            focus_lost: vm.has_function(FOCUS_LOST_FUNCTION),
            focus_gained: vm.has_function(FOCUS_GAINED_FUNCTION),
            renderer_reset: vm.has_function(RENDERER_RESET_FUNCTION),
        }
    }
}

/// Averages frames per second over [`FPS_INTERVAL`]
#[derive(Debug, Default)]
struct FpsCounter {
    frames: u32,
    elapsed: Duration,
}

impl FpsCounter {
    fn tick(&mut self, delta: Duration) -> Option<u32> {
        self.frames += 1;
        self.elapsed += delta;
        if self.elapsed < FPS_INTERVAL {
            return None;
        }
        let fps = (self.frames as f64 / self.elapsed.as_secs_f64()) as u32;
        self.frames = 0;
        self.elapsed -= FPS_INTERVAL;
        Some(fps)
    }
}

pub(crate) struct ScriptRunner {
    vm: Box<dyn ScriptVm>,
    ctx: Arc<ScriptContext>,
    primitives: Arc<Primitives>,
    modules: Arc<Modules>,
    callbacks: Callbacks,
}

impl ScriptRunner {
    /// Prepares a fresh VM: host capabilities, `require` and the normal hook
    pub fn new(
        mut vm: Box<dyn ScriptVm>,
        ctx: Arc<ScriptContext>,
        primitives: Arc<Primitives>,
        modules: Arc<Modules>,
    ) -> Self {
        ctx.observer.require(vm.as_mut());
        vm.set_modules(Arc::clone(&modules));
        ctx.install_hook(vm.as_mut(), HookMode::Normal);
        Self {
            vm,
            ctx,
            primitives,
            modules,
            callbacks: Callbacks::default(),
        }
    }

    /// Loads the main entry and calls `setup`.
    ///
    /// Returns false if the run cannot continue; the reason has already been
    /// reported to the observer.
    pub fn setup(&mut self) -> bool {
        let observer = Arc::clone(&self.ctx.observer);
        let program = Arc::clone(self.modules.program());

        let Some(entry) = program.entry() else {
            observer.warn("Empty project.");
            return false;
        };
        let Some(code) = program.source(&entry) else {
            observer.warn("Cannot find main entry.");
            return false;
        };
        if code.is_empty() {
            observer.warn("Invalid main entry.");
            return false;
        }

        self.ctx.timeout.activate();
        self.modules.begin_entry(&entry);
        let loaded = self.vm.load(&format!("={}", entry), &code);
        self.modules.end_entry();
        let discarded = match loaded {
            Ok(discarded) => discarded,
            Err(e) => {
                self.report(&e);
                return false;
            }
        };
        if discarded > 0 {
            let noun = if discarded == 1 { "value" } else { "values" };
            observer.warn(&format!("Discarded {} unused return {}.", discarded, noun));
        }

        self.callbacks = Callbacks::detect(self.vm.as_ref());
        if self.vm.has_function(SETUP_FUNCTION) {
            self.ctx.timeout.activate();
            if let Err(e) = self.vm.call(SETUP_FUNCTION, &[]) {
                self.report(&e);
                return false;
            }
        }
        info!(entry = %entry, "script started");
        true
    }

    /// Runs one frame: `update`, then commit, then pending host events.
    ///
    /// Returns false when the run should end.
    pub fn cycle(&mut self, delta: f64) -> bool {
        self.ctx.timeout.activate();
        if !self.callbacks.update {
            debug!("no update function, ending run");
            return false;
        }

        self.primitives.new_frame();
        let result = self.vm.call(UPDATE_FUNCTION, &[Value::Number(delta)]);
        if let Err(e) = result {
            self.report(&e);
            return false;
        }
        if self.ctx.state() == ExecutionState::Halting {
            return false;
        }
        self.primitives.commit();

        self.dispatch_events();
        true
    }

    fn dispatch_events(&mut self) {
        let events = self.ctx.take_events();
        let focus = match events.focus {
            Some(FocusChange::Lost) if self.callbacks.focus_lost => Some(FOCUS_LOST_FUNCTION),
            Some(FocusChange::Gained) if self.callbacks.focus_gained => Some(FOCUS_GAINED_FUNCTION),
            _ => None,
        };
        let reset = (events.renderer_reset && self.callbacks.renderer_reset).then_some(RENDERER_RESET_FUNCTION);
        for name in focus.into_iter().chain(reset) {
            if let Err(e) = self.vm.call(name, &[]) {
                self.report(&e);
            }
        }
    }

    /// Threaded frame loop; returns once the run ended for any reason
    pub fn run_loop(&mut self, frame_duration: Duration) {
        let ctx = Arc::clone(&self.ctx);
        let mut fps = FpsCounter::default();
        let mut stamp = Instant::now();
        let mut last = ctx.state();

        loop {
            let begin = Instant::now();
            let delta = begin.saturating_duration_since(stamp);
            stamp = begin;
            if let Some(value) = fps.tick(delta) {
                ctx.set_fps(value);
            }

            let current = ctx.state();
            if last != current {
                if current == ExecutionState::Paused {
                    // Stop at the first line of the next frame
                    ctx.session.request_step(Step::Into);
                    self.install_hook(HookMode::Break);
                } else if last == ExecutionState::Paused {
                    self.install_hook(HookMode::Normal);
                    ctx.timeout.activate();
                }
                last = current;
            }
            match current {
                ExecutionState::Paused => {
                    let seen = ctx.session.generation();
                    if !ctx.session.steps().any() {
                        if ctx.state() == ExecutionState::Paused {
                            ctx.session.wait_for_change(seen, ctx.session.wait_interval());
                        }
                        continue;
                    }
                }
                ExecutionState::Ready | ExecutionState::Halting => break,
                ExecutionState::Running => {}
            }

            if !self.cycle(delta.as_secs_f64()) {
                break;
            }

            if let Some(rest) = frame_duration.checked_sub(begin.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    pub fn install_hook(&mut self, mode: HookMode) {
        self.ctx.install_hook(self.vm.as_mut(), mode);
    }

    /// Calls `quit` and drops everything the run accumulated
    pub fn finish(&mut self) {
        if self.callbacks.quit {
            self.install_hook(HookMode::Quit);
            self.ctx.timeout.activate();
            if let Err(e) = self.vm.call(QUIT_FUNCTION, &[]) {
                self.report(&e);
            }
        }
        self.callbacks = Callbacks::default();
        self.ctx.session.reset();
        self.ctx.take_events();
        self.ctx.set_fps(0);
        self.ctx.timeout.finish();
        self.modules.clear();
        info!("script finished");
    }

    /// Surfaces a script error to the observer.
    ///
    /// The abort raised for a requested stop is expected and only logged.
    fn report(&self, error: &ScriptError) {
        if error.is_abort() && self.ctx.state() == ExecutionState::Halting {
            debug!("script aborted: {}", error);
            return;
        }
        warn!("script error: {}", error);
        self.ctx.observer.error(&error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_after_interval() {
        let mut counter = FpsCounter::default();
        for _ in 0..149 {
            assert_eq!(counter.tick(Duration::from_millis(20)), None);
        }
        assert_eq!(counter.tick(Duration::from_millis(20)), Some(50));
        // Window restarts after reporting
        assert_eq!(counter.tick(Duration::from_millis(20)), None);
    }
}
