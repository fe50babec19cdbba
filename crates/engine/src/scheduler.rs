//! Background flush and compaction workers.
//!
//! Each pipeline has one [`JobSlot`] and one worker thread fed by a
//! crossbeam channel. A trigger claims the slot (`Idle -> Running`) before it
//! enqueues a task, so a trigger that arrives while a job is running is
//! simply dropped. The worker moves the slot to `Committed` or `Failed`
//! when the job ends; both admit the next trigger like `Idle` does.
//!
//! Shutdown is by disconnection: closing the engine drops the sender, the
//! worker drains whatever is still queued and exits.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::Result;
use crate::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Committed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Committed => "committed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Flush,
    Compaction,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Job::Flush => "flush",
            Job::Compaction => "compaction",
        }
    }
}

/// Admission control for one pipeline.
pub(crate) struct JobSlot {
    state: Mutex<JobState>,
    changed: Condvar,
}

impl JobSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(JobState::Idle),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Claims the slot unless a job is already running.
    pub(crate) fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == JobState::Running {
            return false;
        }
        *state = JobState::Running;
        true
    }

    /// Waits for any running job to end, then claims the slot.
    pub(crate) fn begin_wait(&self) {
        let mut state = self.state.lock();
        while *state == JobState::Running {
            self.changed.wait(&mut state);
        }
        *state = JobState::Running;
    }

    pub(crate) fn finish(&self, ok: bool) {
        let mut state = self.state.lock();
        *state = if ok {
            JobState::Committed
        } else {
            JobState::Failed
        };
        self.changed.notify_all();
    }
}

/// The sending half of a worker's queue. `None` once the engine is closing.
pub(crate) struct Trigger {
    tx: Mutex<Option<Sender<()>>>,
}

impl Trigger {
    fn new(tx: Sender<()>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Claims `slot` and enqueues one run. Returns `false` if the trigger
    /// was dropped because a job is already running or the worker is gone.
    pub(crate) fn fire(&self, slot: &JobSlot, job: Job) -> bool {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        if !slot.try_begin() {
            tracing::debug!(job = job.name(), "trigger dropped, job already running");
            return false;
        }
        if tx.send(()).is_err() {
            slot.finish(false);
            return false;
        }
        tracing::debug!(job = job.name(), "job scheduled");
        true
    }

    /// Disconnects the queue; the worker exits after draining it.
    pub(crate) fn disconnect(&self) {
        self.tx.lock().take();
    }
}

pub(crate) struct Triggers {
    pub(crate) flush: Trigger,
    pub(crate) compaction: Trigger,
}

pub(crate) struct Receivers {
    pub(crate) flush: Receiver<()>,
    pub(crate) compaction: Receiver<()>,
}

pub(crate) fn channels() -> (Triggers, Receivers) {
    let (flush_tx, flush_rx) = unbounded();
    let (compaction_tx, compaction_rx) = unbounded();
    (
        Triggers {
            flush: Trigger::new(flush_tx),
            compaction: Trigger::new(compaction_tx),
        },
        Receivers {
            flush: flush_rx,
            compaction: compaction_rx,
        },
    )
}

pub(crate) struct Workers {
    pub(crate) flush: JoinHandle<()>,
    pub(crate) compaction: JoinHandle<()>,
}

pub(crate) fn spawn_workers(shared: &Arc<Shared>, rx: Receivers) -> Result<Workers> {
    let flush = spawn(Arc::clone(shared), Job::Flush, rx.flush)?;
    let compaction = spawn(Arc::clone(shared), Job::Compaction, rx.compaction)?;
    Ok(Workers { flush, compaction })
}

fn spawn(shared: Arc<Shared>, job: Job, rx: Receiver<()>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(format!("tidewater-{}", job.name()))
        .spawn(move || {
            while rx.recv().is_ok() {
                match job {
                    Job::Flush => shared.background_flush(),
                    Job::Compaction => shared.background_compaction(),
                }
            }
            tracing::debug!(job = job.name(), "worker stopped");
        })?;
    Ok(handle)
}
