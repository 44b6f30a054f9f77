//! Fixed pool of worker threads, each owning at most one interpreter.

use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::interpreter::Interpreter;
use crate::scope;

/// State owned by one worker thread for its whole life.
pub(crate) struct WorkerState {
    pub(crate) index: usize,
    pub(crate) interpreter: Option<Interpreter>,
}

pub(crate) type Job = Box<dyn FnOnce(&mut WorkerState) + Send + 'static>;

/// Thread pool dispatching jobs to long-lived script workers.
pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    closed: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: NonZeroUsize,
}

impl WorkerPool {
    /// Spawns `config.workers()` named threads.
    pub(crate) fn new(config: &SandboxConfig) -> SandboxResult<Self> {
        let size = config.workers();
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(size.get());
        for index in 0..size.get() {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix()))
                .stack_size(SandboxConfig::worker_stack_size())
                .spawn(move || worker_loop(index, &receiver))
                .map_err(SandboxError::interpreter)?;
            handles.push(handle);
        }
        debug!(workers = size.get(), "started script worker pool");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
            handles: Mutex::new(handles),
            size,
        })
    }

    /// Number of worker threads.
    pub(crate) const fn size(&self) -> NonZeroUsize {
        self.size
    }

    /// Returns `true` once [`Self::close`] has been called.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues a job for the next free worker.
    pub(crate) fn submit(&self, job: Job) -> SandboxResult<()> {
        if self.is_closed() {
            return Err(SandboxError::PoolClosed);
        }
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| SandboxError::PoolClosed),
            None => Err(SandboxError::PoolClosed),
        }
    }

    /// Rejects new work. Jobs already queued still run.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Closes the pool and waits for every worker to finish its queue.
    ///
    /// Called from a worker thread, that worker is skipped.
    pub(crate) fn join(&self) {
        self.close();
        let current = thread::current().id();
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("script worker terminated by panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(index: usize, receiver: &Mutex<Receiver<Job>>) {
    scope::mark_worker();
    let mut state = WorkerState {
        index,
        interpreter: None,
    };
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        let Ok(job) = job else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
            error!(worker = index, "script job panicked; discarding interpreter");
            state.interpreter = None;
        }
    }
    debug!(worker = index, "script worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn pool(workers: usize) -> WorkerPool {
        let config = SandboxConfig::new()
            .with_workers(NonZeroUsize::new(workers).unwrap())
            .with_thread_name_prefix("test-worker");
        WorkerPool::new(&config).unwrap()
    }

    #[test]
    fn jobs_run_on_named_workers() {
        let pool = pool(2);
        let (tx, rx) = channel();
        pool.submit(Box::new(move |state: &mut WorkerState| {
            let name = thread::current().name().map(str::to_owned);
            tx.send((state.index, name, scope::on_worker())).unwrap();
        }))
        .unwrap();
        let (index, name, on_worker) = rx.recv().unwrap();
        assert!(index < 2);
        assert!(name.unwrap().starts_with("test-worker-"));
        assert!(on_worker);
        assert!(!scope::on_worker());
    }

    #[test]
    fn single_worker_runs_in_submission_order() {
        let pool = pool(1);
        let (tx, rx) = channel();
        for n in 0..5 {
            let tx = tx.clone();
            pool.submit(Box::new(move |_: &mut WorkerState| tx.send(n).unwrap()))
                .unwrap();
        }
        let seen: Vec<i32> = rx.iter().take(5).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn closed_pool_rejects_work() {
        let pool = pool(1);
        pool.join();
        assert!(pool.is_closed());
        let err = pool.submit(Box::new(|_: &mut WorkerState| {})).unwrap_err();
        assert!(matches!(err, SandboxError::PoolClosed));
    }

    #[test]
    fn worker_survives_panicking_job() {
        let pool = pool(1);
        pool.submit(Box::new(|_: &mut WorkerState| panic!("boom"))).unwrap();
        let (tx, rx) = channel();
        pool.submit(Box::new(move |state: &mut WorkerState| tx.send(state.index).unwrap()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), 0);
    }
}
