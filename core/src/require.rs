//! Program sources and module loading
//!
//! A [`Program`] supplies the main entry and the source of every module.
//! [`Modules`] backs the VM's `require`: it loads each module at most once
//! and tracks the chain of modules currently loading so recursive requires
//! are reported instead of looping.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::error::ScriptError;
use crate::lock;
use crate::observer::Observer;
use crate::vm::ScriptVm;

/// Source provider for a runnable program
pub trait Program: Send + Sync {
    /// Asset name of the main entry, `None` for an empty project
    fn entry(&self) -> Option<String>;

    /// Source code of an asset, `None` if the program has no such asset
    fn source(&self, name: &str) -> Option<String>;
}

/// Program held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryProgram {
    entry: Option<String>,
    sources: HashMap<String, String>,
}

impl MemoryProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the main entry and marks it as such
    pub fn with_entry(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        let name = name.into();
        self.sources.insert(name.clone(), code.into());
        self.entry = Some(name);
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.insert(name, code);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, code: impl Into<String>) {
        self.sources.insert(name.into(), code.into());
    }
}

impl Program for MemoryProgram {
    fn entry(&self) -> Option<String> {
        self.entry.clone()
    }

    fn source(&self, name: &str) -> Option<String> {
        self.sources.get(name).cloned()
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    /// Every module loaded or loading during this run
    required: HashSet<String>,
    /// Modules currently loading, outermost first
    dependency: Vec<String>,
}

/// Per-run module registry
pub struct Modules {
    program: Arc<dyn Program>,
    observer: Arc<dyn Observer>,
    /// Script file extension without the dot
    extension: String,
    state: Mutex<ModuleState>,
}

impl Modules {
    pub fn new(program: Arc<dyn Program>, observer: Arc<dyn Observer>, extension: impl Into<String>) -> Self {
        Self {
            program,
            observer,
            extension: extension.into(),
            state: Mutex::new(ModuleState::default()),
        }
    }

    pub fn program(&self) -> &Arc<dyn Program> {
        &self.program
    }

    /// Appends the script extension unless the name already carries it
    pub fn full_name(&self, name: &str) -> String {
        if self.has_extension(name) {
            name.to_string()
        } else {
            format!("{}.{}", name, self.extension)
        }
    }

    /// Removes the script extension if present
    pub fn stripped_name<'a>(&self, name: &'a str) -> &'a str {
        if self.has_extension(name) {
            &name[..name.len() - self.extension.len() - 1]
        } else {
            name
        }
    }

    fn has_extension(&self, name: &str) -> bool {
        let suffix_len = self.extension.len() + 1;
        name.len() > suffix_len
            && name.is_char_boundary(name.len() - suffix_len)
            && name[name.len() - suffix_len..].starts_with('.')
            && name[name.len() - self.extension.len()..].eq_ignore_ascii_case(&self.extension)
    }

    /// Marks the main entry as loading
    pub fn begin_entry(&self, entry: &str) {
        let name = self.stripped_name(entry).to_string();
        lock(&self.state).dependency.push(name);
    }

    pub fn end_entry(&self) {
        lock(&self.state).dependency.pop();
    }

    /// Loads a module into `vm`.
    ///
    /// Returns `Ok(false)` without running anything when the module was
    /// already required or cannot be found; both cases are reported to the
    /// observer. Errors raised while running the module propagate.
    pub fn require(&self, vm: &mut dyn ScriptVm, name: &str) -> Result<bool, ScriptError> {
        {
            let state = lock(&self.state);
            if state.required.contains(name) {
                let msg = if state.dependency.is_empty() {
                    format!("Ignored recursive requiring: \"{}\".", name)
                } else {
                    let chain: String = state
                        .dependency
                        .iter()
                        .rev()
                        .map(|dep| format!("\n  \"{}\"", dep))
                        .collect();
                    format!("Ignored recursive requiring: \"{}\" from{}.", name, chain)
                };
                drop(state);
                self.observer.warn(&msg);
                return Ok(false);
            }
        }

        let full = self.full_name(name);
        let Some(code) = self.find_source(&full) else {
            self.observer
                .error(&format!("Cannot require source code: \"{}\".", name));
            return Ok(false);
        };

        {
            let mut state = lock(&self.state);
            state.required.insert(name.to_string());
            state.dependency.push(name.to_string());
        }
        debug!(module = name, "requiring");
        let result = vm.load(&full, &code);
        lock(&self.state).dependency.pop();
        result.map(|_| true)
    }

    /// Looks the module up in the program first, then on disk
    fn find_source(&self, full: &str) -> Option<String> {
        if let Some(code) = self.program.source(full).filter(|code| !code.is_empty()) {
            return Some(code);
        }
        let path = Path::new(full);
        match fs::read_to_string(path) {
            Ok(code) => Some(code),
            Err(e) => {
                trace!(path = %path.display(), "module not on disk: {}", e);
                None
            }
        }
    }

    /// Modules currently loading, outermost first
    pub fn dependency(&self) -> Vec<String> {
        lock(&self.state).dependency.clone()
    }

    pub fn is_required(&self, name: &str) -> bool {
        lock(&self.state).required.contains(name)
    }

    /// Forgets everything loaded during the run
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.required.clear();
        state.dependency.clear();
    }
}
