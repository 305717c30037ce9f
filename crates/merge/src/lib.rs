//! Delayed-merge worker pool.
//!
//! Every successful mutation of a delayed index enqueues one job kind,
//! [`Job::Discard`]: "this index's small segment may have produced a
//! new version; consider folding it in and discarding old versions."
//! A pool of worker threads drains the queue; each job locks its
//! index's name, merges the small segment into the main index, and
//! vacuums deleted entries afterwards when the index asked for it.
//!
//! In [`fileid::DelayedMode::Sync`] the driver calls
//! [`MergeDaemon::run_now`] before the statement returns instead of
//! enqueueing; in batch mode nothing is enqueued at all and the work
//! happens at close.


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use common::{EngineResult, LockName};
use fileid::DelayedMode;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

/// Whether a successful mutation should enqueue a discard job: only in
/// async mode, and never while the handle is in batch mode.
pub fn should_enqueue(mode: DelayedMode, batch: bool) -> bool {
    mode == DelayedMode::Async && !batch
}

/// Work the daemon knows how to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// Merge the named index's small segment and discard old versions.
    Discard { lock_name: LockName },
}

/// An index registered with the daemon.
pub trait MergeTarget: Send + Sync {
    /// Fold the small segment into the main index. Returns whether
    /// anything moved.
    fn merge(&self) -> EngineResult<bool>;

    /// Physically reclaim deleted entries after a merge.
    fn vacuum(&self) -> EngineResult<()>;

    /// Whether vacuum should run after a successful merge.
    fn wants_vacuum(&self) -> bool;
}

#[derive(Default)]
struct DaemonState {
    queue: Vec<Job>,
    targets: HashMap<LockName, Arc<dyn MergeTarget>>,
    /// Per-index locks: a named index is merged by one worker at a time.
    busy: HashMap<LockName, ()>,
}

struct DaemonInner {
    state: Mutex<DaemonState>,
    wake: Condvar,
    shutdown: AtomicBool,
}

/// The worker pool.
pub struct MergeDaemon {
    inner: Arc<DaemonInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MergeDaemon {
    pub fn start(worker_count: usize) -> Self {
        let inner = Arc::new(DaemonInner {
            state: Mutex::new(DaemonState::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..worker_count.max(1))
            .map(|n| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("merge-worker-{n}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("spawn merge worker")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Make an index eligible for background merging.
    pub fn register(&self, lock_name: LockName, target: Arc<dyn MergeTarget>) {
        self.inner.state.lock().targets.insert(lock_name, target);
    }

    pub fn unregister(&self, lock_name: &LockName) {
        let mut state = self.inner.state.lock();
        state.targets.remove(lock_name);
        state.queue.retain(|Job::Discard { lock_name: l }| l != lock_name);
    }

    /// Queue a discard job. Duplicate jobs for the same index collapse
    /// into one.
    pub fn enqueue_discard(&self, lock_name: &LockName) {
        let job = Job::Discard {
            lock_name: lock_name.clone(),
        };
        let mut state = self.inner.state.lock();
        if !state.queue.contains(&job) {
            state.queue.push(job);
            self.inner.wake.notify_one();
        }
    }

    /// Synchronous merge for `DelayedMode::Sync`: run the job on the
    /// calling thread, before the statement returns.
    pub fn run_now(&self, lock_name: &LockName) -> EngineResult<bool> {
        let target = self.inner.state.lock().targets.get(lock_name).cloned();
        match target {
            Some(target) => execute(&target),
            None => Ok(false),
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Block until the queue is drained and no worker holds a job.
    pub fn wait_idle(&self) {
        loop {
            {
                let state = self.inner.state.lock();
                if state.queue.is_empty() && state.busy.is_empty() {
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    /// Stop the workers after the queue drains. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_all();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: &DaemonInner) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                // Take the first job whose index is not being merged by
                // another worker.
                let slot = state.queue.iter().position(|Job::Discard { lock_name }| {
                    !state.busy.contains_key(lock_name)
                });
                if let Some(slot) = slot {
                    let job = state.queue.remove(slot);
                    let Job::Discard { ref lock_name } = job;
                    state.busy.insert(lock_name.clone(), ());
                    break Some(job);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                inner.wake.wait(&mut state);
            }
        };

        let Some(Job::Discard { lock_name }) = job else {
            return;
        };

        let target = inner.state.lock().targets.get(&lock_name).cloned();
        if let Some(target) = target {
            if let Err(e) = execute(&target) {
                log::error!("merge of {:?} failed: {e}", lock_name.file);
            }
        }

        let mut state = inner.state.lock();
        state.busy.remove(&lock_name);
        inner.wake.notify_all();
    }
}

fn execute(target: &Arc<dyn MergeTarget>) -> EngineResult<bool> {
    let merged = target.merge()?;
    if merged && target.wants_vacuum() {
        target.vacuum()?;
    }
    Ok(merged)
}
