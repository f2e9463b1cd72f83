//! Cancellable deferred jobs.
//!
//! A job is a closure due at a wall-clock instant, addressed by a job id so
//! it can be cancelled. Cancellation is best effort: job bodies re-check the
//! state they act on, and that re-check is what keeps a late job harmless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{CoreError, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait DeferredScheduler: Send + Sync {
    /// Run `job` at `due`. Scheduling an id that is already armed replaces it.
    fn schedule(&self, job_id: &str, due: DateTime<Utc>, job: Job) -> Result<()>;

    /// Returns whether an armed job was removed.
    fn cancel(&self, job_id: &str) -> bool;

    /// Number of armed jobs.
    fn pending(&self) -> usize;
}

/// Armed task plus a generation so a finished task only clears its own slot.
struct Armed {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    armed: HashMap<String, Armed>,
}

/// Runs each job on a tokio task that sleeps until the due time.
pub struct TokioScheduler {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    slots: Arc<Mutex<Slots>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            clock,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn current(clock: Arc<dyn Clock>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Scheduler(e.to_string()))?;
        Ok(Self::new(runtime, clock))
    }
}

impl DeferredScheduler for TokioScheduler {
    fn schedule(&self, job_id: &str, due: DateTime<Utc>, job: Job) -> Result<()> {
        let delay = (due - self.clock.now()).to_std().unwrap_or_default();

        let mut slots = self
            .slots
            .lock()
            .map_err(|e| CoreError::Scheduler(e.to_string()))?;
        slots.next_generation += 1;
        let generation = slots.next_generation;

        let id = job_id.to_string();
        let finished = Arc::clone(&self.slots);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut slots) = finished.lock() {
                if slots.armed.get(&id).is_some_and(|a| a.generation == generation) {
                    slots.armed.remove(&id);
                }
            }
            debug!(job_id = %id, "deferred job due");
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                warn!(job_id = %id, error = %e, "deferred job panicked");
            }
        });

        let replaced = slots.armed.insert(
            job_id.to_string(),
            Armed {
                generation,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
        }
        debug!(%job_id, ?delay, "deferred job armed");
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        match slots.armed.remove(job_id) {
            Some(armed) => {
                armed.handle.abort();
                debug!(%job_id, "deferred job cancelled");
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.slots.lock().map(|s| s.armed.len()).unwrap_or(0)
    }
}

struct ManualJob {
    id: String,
    due: DateTime<Utc>,
    job: Job,
}

/// Holds jobs until [`ManualScheduler::run_due`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<ManualJob>>,
    ignore_cancel: bool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler whose `cancel` never takes effect, for exercising late
    /// jobs.
    pub fn ignoring_cancellation() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            ignore_cancel: true,
        }
    }

    /// Run every job due at or before `now`, earliest first. Returns how many ran.
    pub fn run_due(&self, now: DateTime<Utc>) -> usize {
        let mut due = {
            let Ok(mut jobs) = self.jobs.lock() else {
                return 0;
            };
            let (ready, later): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *jobs).into_iter().partition(|j| j.due <= now);
            *jobs = later;
            ready
        };
        due.sort_by(|a, b| a.due.cmp(&b.due));

        let count = due.len();
        for ManualJob { id, job, .. } in due {
            debug!(job_id = %id, "running manual job");
            job();
        }
        count
    }

    pub fn due_times(&self) -> Vec<(String, DateTime<Utc>)> {
        self.jobs
            .lock()
            .map(|jobs| jobs.iter().map(|j| (j.id.clone(), j.due)).collect())
            .unwrap_or_default()
    }
}

impl DeferredScheduler for ManualScheduler {
    fn schedule(&self, job_id: &str, due: DateTime<Utc>, job: Job) -> Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| CoreError::Scheduler(e.to_string()))?;
        jobs.retain(|j| j.id != job_id);
        jobs.push(ManualJob {
            id: job_id.to_string(),
            due,
            job,
        });
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        if self.ignore_cancel {
            return false;
        }
        let Ok(mut jobs) = self.jobs.lock() else {
            return false;
        };
        let before = jobs.len();
        jobs.retain(|j| j.id != job_id);
        jobs.len() != before
    }

    fn pending(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }
}
