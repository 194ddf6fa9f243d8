//! Fixed-size worker pool with a bounded job queue.

use crossbeam::queue::ArrayQueue;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

/// Unit of work executed by one worker.
pub(crate) trait Job: Send + 'static {
    fn run(self);
}

struct Shared<J> {
    queue: ArrayQueue<J>,
    running: Mutex<bool>,
    ready: Condvar,
}

/// `size` worker threads consuming one bounded FIFO queue.
///
/// Workers sleep on a condition variable until a job arrives or the pool
/// stops. A panicking job is logged and does not take its worker down.
pub(crate) struct WorkerPool<J: Job> {
    shared: Arc<Shared<J>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl<J: Job> WorkerPool<J> {
    pub(crate) fn new(size: usize, capacity: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(capacity.max(1)),
            running: Mutex::new(true),
            ready: Condvar::new(),
        });

        let workers = (0..size)
            .map(|index| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("mill-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queues `job`, handing it back when the queue is full or the pool stopped.
    pub(crate) fn enqueue(&self, job: J) -> Result<(), J> {
        let running = self.shared.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !*running {
            return Err(job);
        }

        self.shared.queue.push(job)?;
        drop(running);

        self.shared.ready.notify_one();
        Ok(())
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Stops the workers and joins them. Jobs still queued are dropped.
    pub(crate) fn stop(&self) {
        *self.shared.running.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.shared.ready.notify_all();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread exited with a panic");
            }
        }

        let dropped = std::iter::from_fn(|| self.shared.queue.pop()).count();
        if dropped > 0 {
            debug!(dropped, "dropped queued jobs on stop");
        }
    }
}

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<J: Job>(shared: &Shared<J>) {
    loop {
        let job = {
            let mut running = shared.running.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if !*running {
                    return;
                }
                if let Some(job) = shared.queue.pop() {
                    break job;
                }
                running = shared
                    .ready
                    .wait(running)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
            error!("job panicked; worker continues");
        }
    }
}

#[cfg(test)]
impl Job for Box<dyn FnOnce() + Send> {
    fn run(self) {
        self()
    }
}
