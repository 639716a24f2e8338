//! Asynchronous disk scheduler.
//!
//! The scheduler decouples page I/O from the tasks that request it:
//! callers enqueue `DiskRequest`s and immediately receive a completion
//! channel, while one or more dedicated worker threads drain the queue
//! and run the blocking `DiskManager` calls. Each request is executed
//! exactly once, and its completion resolves only after the transfer
//! has fully finished.
//!
//! With a single worker (the default) requests are serviced in strict
//! submission order. With multiple workers, requests for *different*
//! pages may complete out of order; the buffer pool never issues
//! concurrent requests for the same frame and sequences write-before-read
//! per page id itself, so it is safe with either configuration.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::trace;

use super::DiskManager;
use crate::storage::error::DiskError;
use crate::storage::page::{PageData, PageId};

/// A single page-granular I/O request.
///
/// The `done` channel is fulfilled by a worker thread once the transfer
/// has completed: reads deliver the filled page buffer, writes deliver
/// the outcome of the write. A failed transfer resolves the channel with
/// the underlying `DiskError`.
pub enum DiskRequest {
    /// Read one page from disk.
    Read {
        /// Page to read.
        page_id: PageId,
        /// Receives the page contents once the read finishes.
        done: oneshot::Sender<Result<PageData, DiskError>>,
    },
    /// Write one page to disk.
    Write {
        /// Page to write.
        page_id: PageId,
        /// Bytes to write; ownership moves to the worker.
        data: PageData,
        /// Receives the outcome once the write finishes.
        done: oneshot::Sender<Result<(), DiskError>>,
    },
}

/// Queue state shared between the scheduler handle and its workers.
struct QueueState {
    requests: VecDeque<DiskRequest>,
    shutdown: bool,
}

struct SharedQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
}

/// Schedules disk read and write operations onto worker threads.
///
/// Workers are spawned in the constructor and joined in `Drop`. On
/// shutdown, requests already accepted are drained before the workers
/// exit, so every completion channel handed out by `schedule` resolves.
pub struct DiskScheduler {
    queue: Arc<SharedQueue>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler with a single worker thread.
    ///
    /// One worker serializes all disk I/O in strict FIFO order.
    pub fn new<D: DiskManager>(disk: Arc<D>) -> Self {
        Self::with_workers(disk, 1)
    }

    /// Creates a scheduler with `workers` threads sharing one queue.
    ///
    /// Per-page ordering is not preserved across workers; see the module
    /// documentation for the contract callers must uphold.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is 0.
    pub fn with_workers<D: DiskManager>(disk: Arc<D>, workers: usize) -> Self {
        assert!(workers > 0, "scheduler needs at least one worker");

        let queue = Arc::new(SharedQueue {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
        });

        let handles = (0..workers)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let disk = Arc::clone(&disk);
                thread::Builder::new()
                    .name(format!("disk-io-{}", i))
                    .spawn(move || worker_loop(queue, disk))
                    .expect("failed to spawn disk worker")
            })
            .collect();

        Self {
            queue,
            workers: handles,
        }
    }

    /// Enqueues a request. Never blocks on I/O.
    pub fn schedule(&self, request: DiskRequest) {
        {
            let mut state = self.queue.state.lock();
            state.requests.push_back(request);
        }
        self.queue.work_available.notify_one();
    }

    /// Enqueues a read and returns its completion channel.
    pub fn schedule_read(&self, page_id: PageId) -> oneshot::Receiver<Result<PageData, DiskError>> {
        let (done, rx) = oneshot::channel();
        self.schedule(DiskRequest::Read { page_id, done });
        rx
    }

    /// Enqueues a write and returns its completion channel.
    pub fn schedule_write(
        &self,
        page_id: PageId,
        data: PageData,
    ) -> oneshot::Receiver<Result<(), DiskError>> {
        let (done, rx) = oneshot::channel();
        self.schedule(DiskRequest::Write { page_id, data, done });
        rx
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            state.shutdown = true;
        }
        self.queue.work_available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<D: DiskManager>(queue: Arc<SharedQueue>, disk: Arc<D>) {
    loop {
        let request = {
            let mut state = queue.state.lock();
            loop {
                if let Some(request) = state.requests.pop_front() {
                    break request;
                }
                if state.shutdown {
                    return;
                }
                queue.work_available.wait(&mut state);
            }
        };

        // The completion receiver may have been dropped; a failed send
        // is not an error for the worker.
        match request {
            DiskRequest::Read { page_id, done } => {
                trace!(page = page_id.page_num(), "disk read");
                let mut data = PageData::new();
                let result = disk.read_page(page_id, data.as_mut_slice()).map(|_| data);
                let _ = done.send(result);
            }
            DiskRequest::Write { page_id, data, done } => {
                trace!(page = page_id.page_num(), "disk write");
                let result = disk.write_page(page_id, data.as_slice());
                let _ = done.send(result);
            }
        }
    }
}
