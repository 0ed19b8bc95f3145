//! Producer/consumer command buffer
//!
//! The script thread appends to `producing`; once per frame `commit` swaps it
//! into `consuming`, which the frame driver drains with `pop`. A `sync`
//! additionally blocks the script thread until that drain has happened.

use std::mem;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use super::{Command, CommandQueue};
use crate::lock;

/// Upper bound between wake-up checks of a blocked `sync`
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct BufferState {
    producing: CommandQueue,
    consuming: CommandQueue,
    discarded: CommandQueue,
    /// Next `commit` must behave as `sync`
    blocking: bool,
    /// A `sync` caller is waiting for the consumer
    syncing: bool,
    /// Teardown started, `sync` is a no-op from now on
    forbidden: bool,
    /// Number of batches handed to the consumer so far
    published: u64,
    /// Highest batch number the consumer has finished with
    drained: u64,
}

impl BufferState {
    /// Hands `producing` over to the consumer.
    ///
    /// Whatever the consumer had not popped yet is moved into `discarded`.
    fn swap(&mut self) -> usize {
        mem::swap(&mut self.producing, &mut self.consuming);
        if !self.producing.is_empty() {
            trace!("discarding {} unconsumed commands", self.producing.len());
            self.discarded.append(&mut self.producing);
        }
        self.published += 1;
        self.consuming.len()
    }

    fn take(&mut self) -> (CommandQueue, u64) {
        self.discarded.clear();
        (mem::take(&mut self.consuming), self.published)
    }

    fn finish(&mut self, batch: u64) {
        self.drained = self.drained.max(batch);
        if self.drained >= self.published {
            self.syncing = false;
        }
    }
}

/// Cross-thread command buffer
#[derive(Debug)]
pub struct CommandBuffer {
    state: Mutex<BufferState>,
    released: Condvar,
    sync_interval: Duration,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::with_sync_interval(DEFAULT_SYNC_INTERVAL)
    }

    /// Creates a buffer whose blocked `sync` re-checks its flags at least
    /// this often
    pub fn with_sync_interval(sync_interval: Duration) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            released: Condvar::new(),
            sync_interval,
        }
    }

    /// Appends a command to the producing queue
    pub fn add(&self, cmd: Command) {
        lock(&self.state).producing.push(cmd);
    }

    /// Appends a command; with `block` set the next `commit` waits for it
    /// to be consumed
    pub fn add_blocking(&self, cmd: Command, block: bool) {
        let mut state = lock(&self.state);
        state.producing.push(cmd);
        state.blocking |= block;
    }

    /// Publishes the producing queue to the consumer.
    ///
    /// Returns the number of commands handed over. Behaves as [`sync`](Self::sync)
    /// when a blocking command was added since the last commit.
    pub fn commit(&self) -> usize {
        {
            let mut state = lock(&self.state);
            if !state.blocking {
                return state.swap();
            }
            state.blocking = false;
        }
        self.sync()
    }

    /// Publishes the producing queue and blocks until the consumer is done with it.
    ///
    /// Returns immediately with 0 once the buffer is forbidden.
    pub fn sync(&self) -> usize {
        let mut state = lock(&self.state);
        if state.forbidden {
            return 0;
        }
        let count = state.swap();
        let ticket = state.published;
        state.syncing = true;
        while state.drained < ticket && !state.forbidden {
            state = match self.released.wait_timeout(state, self.sync_interval) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        if state.forbidden {
            debug!("sync released by forbid");
            return 0;
        }
        count
    }

    /// Takes the consuming queue. Frame driver only.
    ///
    /// Releases any `sync` caller waiting for this batch right away; use
    /// [`drain`](Self::drain) to release it only after the batch ran.
    pub fn pop(&self) -> CommandQueue {
        let queue = {
            let mut state = lock(&self.state);
            let (queue, batch) = state.take();
            state.finish(batch);
            queue
        };
        self.released.notify_all();
        queue
    }

    /// Takes the consuming queue and hands it to `run` outside the lock.
    ///
    /// A `sync` caller waiting for this batch is released once `run`
    /// returned, so everything it queued has taken effect by then.
    pub fn drain<R>(&self, run: impl FnOnce(CommandQueue) -> R) -> R {
        let (queue, batch) = lock(&self.state).take();
        let result = run(queue);
        lock(&self.state).finish(batch);
        self.released.notify_all();
        result
    }

    /// Drops every queue and makes `sync` a permanent no-op.
    ///
    /// Used during teardown so the script thread can never block on a frame
    /// driver that will not run again.
    pub fn forbid(&self) {
        {
            let mut state = lock(&self.state);
            state.producing.clear();
            state.consuming.clear();
            state.discarded.clear();
            state.blocking = false;
            state.syncing = false;
            state.forbidden = true;
        }
        self.released.notify_all();
    }

    /// Returns the buffer to its initial state
    pub fn reset(&self) {
        {
            let mut state = lock(&self.state);
            let published = state.published;
            *state = BufferState {
                published,
                drained: published,
                ..BufferState::default()
            };
        }
        self.released.notify_all();
    }

    /// Whether a `sync` caller is waiting for the consumer
    pub fn is_syncing(&self) -> bool {
        lock(&self.state).syncing
    }

    pub fn is_forbidden(&self) -> bool {
        lock(&self.state).forbidden
    }

    /// Number of commands waiting in the producing queue
    pub fn pending(&self) -> usize {
        lock(&self.state).producing.len()
    }

    /// Number of commands dropped by the last swaps and not yet cleared
    pub fn discarded(&self) -> usize {
        lock(&self.state).discarded.len()
    }
}
