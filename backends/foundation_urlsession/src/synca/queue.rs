use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Duration;

use concurrent_queue::{ConcurrentQueue, PopError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long the delivery thread parks when it finds no work.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Serial delivery queue running jobs on one dedicated thread, in order.
///
/// Jobs are pushed onto a `ConcurrentQueue`; the worker pops them and parks
/// with a timeout when idle, being unparked on every dispatch. Closing the
/// queue lets already queued jobs run before the worker exits.
pub struct DelegateQueue {
    jobs: Arc<ConcurrentQueue<Job>>,
    worker: Thread,
}

impl core::fmt::Debug for DelegateQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DelegateQueue")
            .field("pending", &self.jobs.len())
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}

impl DelegateQueue {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let jobs: Arc<ConcurrentQueue<Job>> = Arc::new(ConcurrentQueue::unbounded());

        let worker_jobs = jobs.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || Self::run(&worker_jobs))?;

        Ok(Self {
            jobs,
            worker: handle.thread().clone(),
        })
    }

    fn run(jobs: &ConcurrentQueue<Job>) {
        loop {
            match jobs.pop() {
                Ok(job) => {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("Delegate callback panicked");
                    }
                }
                Err(PopError::Empty) => thread::park_timeout(IDLE_PARK),
                Err(PopError::Closed) => {
                    tracing::debug!("Delegate queue closed, delivery thread exiting");
                    return;
                }
            }
        }
    }

    /// Queues a job; returns false when the queue was already closed.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.jobs.push(Box::new(job)) {
            Ok(()) => {
                self.worker.unpark();
                true
            }
            Err(_) => {
                tracing::warn!("Dropping delegate callback, queue is closed");
                false
            }
        }
    }

    pub fn close(&self) {
        if self.jobs.close() {
            tracing::debug!("Delegate queue closing");
        }
        self.worker.unpark();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl Drop for DelegateQueue {
    fn drop(&mut self) {
        self.close();
    }
}
