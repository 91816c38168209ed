//! Worker Pool
//!
//! Fixed set of named OS threads that run pipeline tasks. Tasks are
//! submitted through a channel and report back through a [`TaskHandle`];
//! a panicking task is caught and surfaces as
//! [`Error::WorkerPanicked`] instead of taking the thread down.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads reused across pipeline runs
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `{name}-{i}`
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self> {
        let name = name.into();
        if threads == 0 {
            return Err(Error::InvalidConfig(format!(
                "worker pool '{}' needs at least one thread",
                name
            )));
        }

        let (tx, rx) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || run_worker(rx))?;
            workers.push(handle);
        }
        debug!(pool = %name, threads, "Worker pool started");

        Ok(Self {
            name,
            jobs: Some(tx),
            workers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue `task` on the next idle worker
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::PoolShutdown(self.name.clone()))?;

        let (tx, rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            // The handle may already be gone; nothing to report to then
            let _ = tx.send(outcome);
        });
        jobs.send(job)
            .map_err(|_| Error::PoolShutdown(self.name.clone()))?;

        Ok(TaskHandle { result: rx })
    }

    /// Stop accepting tasks and wait for the workers to drain the queue
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!(pool = %self.name, "Worker thread exited abnormally");
            }
        }
        debug!(pool = %self.name, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        job();
    }
}

/// Completion of one submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    result: Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task and return its value
    pub fn join(self) -> Result<T> {
        match self.result.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(Error::WorkerPanicked(panic_message(payload.as_ref()))),
            Err(_) => Err(Error::WorkerPanicked("task dropped before completion".into())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
