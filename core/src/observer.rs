//! Notifications from the engine to its embedder

use tracing::{error, info, warn};

use crate::vm::ScriptVm;

/// Receives script output, diagnostics and debugger focus changes.
///
/// Methods are called from the script thread in threaded mode.
pub trait Observer: Send + Sync {
    /// Installs host capabilities into a freshly created VM before any
    /// script code runs
    fn require(&self, _vm: &mut dyn ScriptVm) {}

    fn print(&self, msg: &str);

    fn warn(&self, msg: &str);

    fn error(&self, msg: &str);

    /// The debugger stopped at `line` of `source`
    fn focus(&self, source: &str, line: i32);

    /// The script loop finished and the engine is READY again
    fn stop(&self);
}

/// Observer that forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn print(&self, msg: &str) {
        info!(target: "script", "{}", msg);
    }

    fn warn(&self, msg: &str) {
        warn!(target: "script", "{}", msg);
    }

    fn error(&self, msg: &str) {
        error!(target: "script", "{}", msg);
    }

    fn focus(&self, source: &str, line: i32) {
        info!(target: "script", source, line, "paused");
    }

    fn stop(&self) {
        info!(target: "script", "stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::init_tracing;

    #[test]
    fn test_log_observer_is_object_safe() {
        init_tracing();
        let observer: Arc<dyn Observer> = Arc::new(LogObserver);
        observer.print("hello");
        observer.warn("careful");
        observer.error("main:1: boom");
        observer.focus("main", 1);
        observer.stop();
    }
}
