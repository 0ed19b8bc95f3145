//! Nethercore Script - Script execution and debug engine
//!
//! Runs a user program on a script VM, one frame at a time, and exposes a
//! debugger over the run. Scripts normally execute on their own thread and
//! talk to the host only through buffered [`Command`]s that the host thread
//! applies once per presentation frame.
//!
//! # Architecture
//!
//! - [`Executor`] - READY/RUNNING/PAUSED/HALTING state machine owning the script thread
//! - [`Primitives`] - Producer API scripts call; queues commands, shadows host state
//! - [`CommandBuffer`] - Double-buffered queue between the script and host threads
//! - [`DebugSession`] - Breakpoints, stepping, call stack records and variable access
//! - [`TimeoutMonitor`] - Aborts scripts that run too long between activity refreshes
//! - [`ScriptVm`] - Capabilities the engine needs from a script language

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod command;
pub mod config;
pub mod debug;
pub mod error;
pub mod executor;
pub mod host;
pub mod observer;
pub mod primitives;
pub mod require;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod timeout;
pub mod vm;

pub use command::{Command, CommandBuffer, CommandQueue, HostCallback, Readback, run_queue};
pub use config::EngineConfig;
pub use debug::{DebugSession, Record, RecordVariable};
pub use error::{EngineError, ScriptError};
pub use executor::{ExecutionState, Executor};
pub use host::{Audio, Host, Input, Renderer};
pub use observer::{LogObserver, Observer};
pub use primitives::Primitives;
pub use require::{MemoryProgram, Modules, Program};
pub use timeout::{TIMEOUT_DISABLED, TimeoutMonitor};
pub use vm::{Hook, HookEvent, HookMask, Introspect, ScriptVm, Value, VmFactory};

/// Locks a mutex, recovering the data if another thread panicked while
/// holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
