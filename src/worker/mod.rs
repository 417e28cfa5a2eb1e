//! Worker pool
//!
//! A named set of threads draining one unbounded FIFO queue. Shutdown closes
//! the queue: workers finish every item already queued, then `get_work`
//! returns `None` and the worker loop ends. Back-pressure comes from the page
//! buffer's free descriptor limit, not from the queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct QueueState<W> {
    items: VecDeque<W>,
    closed: bool,
}

/// Unbounded blocking FIFO queue with close semantics
pub struct WorkQueue<W> {
    state: Mutex<QueueState<W>>,
    available: Condvar,
}

impl<W> WorkQueue<W> {
    pub fn new() -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item and wake one waiting worker.
    ///
    /// Panics if the queue was closed; work sent after shutdown would be lost.
    pub fn send_work(&self, item: W) {
        let mut state = self.state.lock();
        assert!(!state.closed, "send_work on a closed work queue");
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Block until an item is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn get_work(&self) -> Option<W> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Dequeue without blocking
    pub fn try_get_work(&self) -> Option<W> {
        self.state.lock().items.pop_front()
    }

    /// Stop accepting work and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<W> Default for WorkQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Named pool of threads consuming a [`WorkQueue`]
pub struct WorkerPool<W: Send + 'static> {
    name: String,
    num_workers: usize,
    queue: Arc<WorkQueue<W>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: Send + 'static> WorkerPool<W> {
    /// Create a pool with its own queue
    pub fn new(name: impl Into<String>, num_workers: usize) -> Self {
        Self::with_queue(name, num_workers, Arc::new(WorkQueue::new()))
    }

    /// Create a pool over an existing (possibly shared) queue
    pub fn with_queue(
        name: impl Into<String>,
        num_workers: usize,
        queue: Arc<WorkQueue<W>>,
    ) -> Self {
        assert!(num_workers > 0, "worker pool needs at least one worker");
        WorkerPool {
            name: name.into(),
            num_workers,
            queue,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue(&self) -> &Arc<WorkQueue<W>> {
        &self.queue
    }

    /// Spawn the workers.
    ///
    /// Each worker runs `worker(index, queue)`; the function is expected to
    /// loop on [`WorkQueue::get_work`] until it returns `None`.
    pub fn start<F>(&self, worker: F)
    where
        F: Fn(usize, &WorkQueue<W>) + Send + Sync + 'static,
    {
        let worker = Arc::new(worker);
        let mut handles = self.handles.lock();
        assert!(handles.is_empty(), "worker pool {} already started", self.name);

        for index in 0..self.num_workers {
            let worker = worker.clone();
            let queue = self.queue.clone();
            let handle = thread::Builder::new()
                .name(format!("{} {}", self.name, index))
                .spawn(move || worker(index, &queue))
                .unwrap_or_else(|err| {
                    crate::types::fatal("failed to spawn worker thread", &err)
                });
            handles.push(handle);
        }
        tracing::debug!(pool = %self.name, workers = self.num_workers, "worker pool started");
    }

    /// Enqueue an item for the pool
    pub fn send_work(&self, item: W) {
        self.queue.send_work(item);
    }

    /// Close the queue and join every worker. Calling it twice is a no-op.
    pub fn stop(&self) {
        self.queue.close();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked");
            }
        }
        tracing::debug!(pool = %self.name, "worker pool stopped");
    }
}

impl<W: Send + 'static> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        self.stop();
    }
}
