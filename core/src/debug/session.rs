//! Debugger state shared between the script thread and the UI
//!
//! Breakpoints, records, step flags and the stepping scope each sit behind
//! their own lock so the UI reading one never stalls a hook touching another.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::trace;

use super::breakpoints::Breakpoints;
use super::record::{Record, capture_records};
use super::scope::Scope;
use crate::lock;
use crate::vm::{Introspect, Value};

/// One-shot step request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Over,
    Into,
    Out,
}

/// Pending step requests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepFlags {
    pub over: bool,
    pub into: bool,
    pub out: bool,
}

impl StepFlags {
    pub fn any(&self) -> bool {
        self.over || self.into || self.out
    }

    fn flag(&mut self, step: Step) -> &mut bool {
        match step {
            Step::Over => &mut self.over,
            Step::Into => &mut self.into,
            Step::Out => &mut self.out,
        }
    }
}

/// Variable access forwarded to the paused script thread
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inspection {
    Get(String),
    Set(String, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InspectionReply {
    Get(Option<(String, Value)>),
    Set(bool),
}

#[derive(Debug, Default)]
struct InspectionSlot {
    /// Script thread is parked in the wait loop and answers requests
    serving: bool,
    next_id: u64,
    request: Option<(u64, Inspection)>,
    reply: Option<(u64, InspectionReply)>,
}

/// Breakpoints, records and stepping state of one engine
#[derive(Debug)]
pub struct DebugSession {
    breakpoints: Mutex<Breakpoints>,
    records: Mutex<Vec<Record>>,
    steps: Mutex<StepFlags>,
    scope: Mutex<Scope>,
    /// Bumped on every state change the wait loop cares about
    generation: Mutex<u64>,
    wakeup: Condvar,
    inspection: Mutex<InspectionSlot>,
    replied: Condvar,
    wait_interval: Duration,
}

impl DebugSession {
    pub fn new(wait_interval: Duration) -> Self {
        Self {
            breakpoints: Mutex::new(Breakpoints::new()),
            records: Mutex::new(Vec::new()),
            steps: Mutex::new(StepFlags::default()),
            scope: Mutex::new(Scope::empty()),
            generation: Mutex::new(0),
            wakeup: Condvar::new(),
            inspection: Mutex::new(InspectionSlot::default()),
            replied: Condvar::new(),
            wait_interval,
        }
    }

    pub fn wait_interval(&self) -> Duration {
        self.wait_interval
    }

    // ------------------------------------------------------------------------
    // Breakpoints
    // ------------------------------------------------------------------------

    pub fn set_breakpoint(&self, source: &str, line: i32, on: bool) -> bool {
        lock(&self.breakpoints).set(source, line, on)
    }

    pub fn clear_breakpoints(&self, source: Option<&str>) -> usize {
        lock(&self.breakpoints).clear(source)
    }

    pub fn get_breakpoints(&self, source: Option<&str>, visitor: impl FnMut(&str, i32)) -> usize {
        lock(&self.breakpoints).visit(source, visitor)
    }

    /// Whether a VM chunk name and line hit a breakpoint
    pub fn has_breakpoint(&self, source: &str, line: i32) -> bool {
        lock(&self.breakpoints).contains(source, line)
    }

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    /// Visits the records captured at the current pause, innermost first
    pub fn get_records(&self, mut visitor: impl FnMut(&Record)) -> usize {
        let records = lock(&self.records);
        for record in records.iter() {
            visitor(record);
        }
        records.len()
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }

    pub(crate) fn set_records(&self, records: Vec<Record>) {
        *lock(&self.records) = records;
    }

    pub(crate) fn clear_records(&self) {
        lock(&self.records).clear();
    }

    /// Source and line of the innermost captured frame
    pub(crate) fn focus(&self) -> Option<(String, i32)> {
        lock(&self.records)
            .first()
            .map(|record| (record.source.clone(), record.line))
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    pub fn steps(&self) -> StepFlags {
        *lock(&self.steps)
    }

    pub(crate) fn request_step(&self, step: Step) {
        *lock(&self.steps).flag(step) = true;
        self.notify();
    }

    pub(crate) fn clear_step(&self, step: Step) {
        *lock(&self.steps).flag(step) = false;
    }

    pub(crate) fn reset_steps(&self) {
        *lock(&self.steps) = StepFlags::default();
    }

    pub(crate) fn scope(&self) -> Scope {
        lock(&self.scope).clone()
    }

    pub(crate) fn set_scope(&self, scope: Scope) {
        *lock(&self.scope) = scope;
    }

    /// Clears everything a finished run leaves behind; breakpoints survive
    pub(crate) fn reset(&self) {
        self.clear_records();
        self.reset_steps();
        lock(&self.scope).clear();
    }

    // ------------------------------------------------------------------------
    // Wake-ups
    // ------------------------------------------------------------------------

    pub(crate) fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    /// Wakes the wait loop so it re-checks state and step flags
    pub fn notify(&self) {
        *lock(&self.generation) += 1;
        self.wakeup.notify_all();
    }

    /// Sleeps until [`notify`](Self::notify) ran after `seen` was read, or
    /// until `timeout` elapsed
    pub(crate) fn wait_for_change(&self, seen: u64, timeout: Duration) {
        let guard = lock(&self.generation);
        let _ = self.wakeup.wait_timeout_while(guard, timeout, |generation| *generation == seen);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub(crate) fn set_serving(&self, serving: bool) {
        {
            let mut slot = lock(&self.inspection);
            slot.serving = serving;
            if !serving {
                slot.request = None;
            }
        }
        self.replied.notify_all();
    }

    /// Hands a request to the paused script thread and waits for its answer.
    ///
    /// Returns `None` when the script thread is not parked in the wait loop
    /// or leaves it before answering.
    pub(crate) fn inspect(&self, request: Inspection) -> Option<InspectionReply> {
        let id = {
            let mut slot = lock(&self.inspection);
            if !slot.serving {
                return None;
            }
            slot.next_id += 1;
            let id = slot.next_id;
            slot.request = Some((id, request));
            id
        };
        self.notify();

        let mut slot = lock(&self.inspection);
        loop {
            if matches!(slot.reply, Some((reply_id, _)) if reply_id == id) {
                return slot.reply.take().map(|(_, reply)| reply);
            }
            if !slot.serving {
                return None;
            }
            slot = match self.replied.wait_timeout(slot, self.wait_interval) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Answers a pending request against the suspended VM. Script thread only.
    pub(crate) fn serve(&self, vm: &mut dyn Introspect) {
        let Some((id, request)) = lock(&self.inspection).request.take() else {
            return;
        };
        trace!(?request, "serving inspection");
        let reply = match request {
            Inspection::Get(name) => InspectionReply::Get(find_variable(vm, &name)),
            Inspection::Set(name, value) => {
                let changed = assign_variable(vm, &name, value);
                if changed {
                    let (source, line) = self.focus().unwrap_or_default();
                    self.set_records(capture_records(vm, &source, line));
                }
                InspectionReply::Set(changed)
            }
        };
        lock(&self.inspection).reply = Some((id, reply));
        self.replied.notify_all();
    }
}

/// First local named `name`, searching from the innermost frame outwards
fn find_variable(vm: &dyn Introspect, name: &str) -> Option<(String, Value)> {
    let mut level = 0;
    while vm.frame(level).is_some() {
        if let Some(binding) = vm.locals(level).into_iter().find(|b| b.name == name) {
            return Some((binding.value.type_name().to_string(), binding.value));
        }
        level += 1;
    }
    None
}

/// Writes the innermost local named `name`, or the global of that name if
/// no frame has such a local
fn assign_variable(vm: &mut dyn Introspect, name: &str, value: Value) -> bool {
    let mut level = 0;
    while vm.frame(level).is_some() {
        if vm.locals(level).iter().any(|b| b.name == name) {
            return vm.set_local(level, name, value);
        }
        level += 1;
    }
    vm.set_global(name, value);
    true
}
