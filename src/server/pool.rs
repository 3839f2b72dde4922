//! Fixed-size worker pool draining a bounded request queue.
//!
//! The event loop is the only producer; workers block on a counting
//! semaphore and pull under a mutex, so a queued item is handed to exactly
//! one worker. The queue holds whatever implements [`Work`]; in the server
//! that is a shared connection handle.

use crate::{errors::ServerError, sync::Semaphore};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, trace};

/// A unit of work a pool thread can run to completion.
pub(crate) trait Work: Send + 'static {
    fn process(&self);
}

struct PoolShared<T> {
    queue: Mutex<VecDeque<T>>,
    items: Semaphore,
    stop: AtomicBool,
    max_requests: usize,
}

/// Bounded FIFO work queue with a fixed set of worker threads.
pub(crate) struct WorkerPool<T: Work> {
    shared: Arc<PoolShared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Work> WorkerPool<T> {
    /// Starts `threads` workers sharing a queue bounded at `max_requests`.
    ///
    /// Both parameters must be non-zero.
    pub(crate) fn new(threads: usize, max_requests: usize) -> Result<Self, ServerError> {
        if threads == 0 {
            return Err(ServerError::Config("worker_threads must be > 0"));
        }
        if max_requests == 0 {
            return Err(ServerError::Config("max_queued_requests must be > 0"));
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            items: Semaphore::new(0),
            stop: AtomicBool::new(false),
            max_requests,
        });

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(id, &shared))
                .map_err(ServerError::Pool)?;
            workers.push(handle);
        }
        debug!(threads, max_requests, "worker pool started");

        Ok(Self { shared, workers })
    }

    /// Enqueues `item`, returning `false` when the queue is saturated.
    pub(crate) fn append(&self, item: T) -> bool {
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() > self.shared.max_requests {
                return false;
            }
            queue.push_back(item);
        }
        self.shared.items.post();
        true
    }

    /// Stops every worker and joins them. Queued items that no worker has
    /// picked up yet are discarded.
    pub(crate) fn shutdown(&mut self) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.workers.len() {
            self.shared.items.post();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }
}

impl<T: Work> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T: Work>(id: usize, shared: &PoolShared<T>) {
    loop {
        shared.items.wait();
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        let item = {
            let mut queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };

        match item {
            Some(item) => item.process(),
            // Spurious wakeup or a drained queue; go back to waiting.
            None => continue,
        }
    }
    trace!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    enum Job {
        Count(Arc<AtomicUsize>),
        Record(usize, Arc<Mutex<Vec<usize>>>),
        Block {
            started: Arc<Semaphore>,
            release: Arc<Semaphore>,
        },
    }

    impl Work for Job {
        fn process(&self) {
            match self {
                Job::Count(counter) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Job::Record(id, order) => {
                    order.lock().unwrap().push(*id);
                }
                Job::Block { started, release } => {
                    started.post();
                    release.wait();
                }
            }
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for workers");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn invalid_construction_params_fail() {
        assert!(WorkerPool::<Job>::new(0, 10).is_err());
        assert!(WorkerPool::<Job>::new(2, 0).is_err());
    }

    #[test]
    fn processes_every_appended_item() {
        let pool = WorkerPool::new(4, 100).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            assert!(pool.append(Job::Count(counter.clone())));
        }
        wait_for(|| counter.load(Ordering::SeqCst) == 50);
    }

    #[test]
    fn saturated_queue_rejects_append() {
        let pool = WorkerPool::new(1, 2).unwrap();
        let started = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));

        assert!(pool.append(Job::Block {
            started: started.clone(),
            release: release.clone(),
        }));
        // Once the blocker has started, the queue itself is empty and the
        // single worker is occupied.
        started.wait();

        let counter = Arc::new(AtomicUsize::new(0));
        // Bound check happens before push: lengths 0, 1, 2 pass, 3 refuses.
        assert!(pool.append(Job::Count(counter.clone())));
        assert!(pool.append(Job::Count(counter.clone())));
        assert!(pool.append(Job::Count(counter.clone())));
        assert!(!pool.append(Job::Count(counter.clone())));

        release.post();
        wait_for(|| counter.load(Ordering::SeqCst) == 3);
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = WorkerPool::new(1, 100).unwrap();
        let started = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.append(Job::Block {
            started: started.clone(),
            release: release.clone(),
        });
        started.wait();

        for id in 0..10 {
            assert!(pool.append(Job::Record(id, order.clone())));
        }
        release.post();

        wait_for(|| order.lock().unwrap().len() == 10);
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_joins_workers() {
        let mut pool = WorkerPool::new(3, 10).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            pool.append(Job::Count(counter.clone()));
        }
        wait_for(|| counter.load(Ordering::SeqCst) == 3);
        pool.shutdown();
        assert!(pool.workers.is_empty());
    }
}
