//! Worker pool.
//!
//! A FIFO queue of framed jobs served by a fixed set of threads. `push`
//! wakes one worker; shutdown sets the join flag and broadcasts, after
//! which workers finish whatever is still queued before exiting, so EOF
//! never drops accepted requests on the floor.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::debug;

use crate::server::{Job, Server, Worker, process_job};

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    join: bool,
}

struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    /// Next job, or `None` once the queue is joining and drained.
    fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.join {
                return None;
            }
            state = self.ready.wait(state).unwrap();
        }
    }
}

pub(crate) struct WorkerPool {
    queue: Arc<WorkQueue>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn start(server: Arc<Server>, nthreads: usize) -> io::Result<WorkerPool> {
        let queue = Arc::new(WorkQueue {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        });
        let mut threads = Vec::with_capacity(nthreads);
        for n in 0..nthreads {
            let q = queue.clone();
            let server = server.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("sftp-worker-{n}"))
                .spawn(move || {
                    let mut worker = Worker::new();
                    while let Some(job) = q.pop() {
                        process_job(&server, &mut worker, job);
                    }
                    debug!("worker {n} exiting");
                });
            match spawned {
                Ok(thread) => threads.push(thread),
                Err(e) => {
                    // Tear down whatever already started.
                    WorkerPool { queue, threads }.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(WorkerPool { queue, threads })
    }

    pub(crate) fn push(&self, job: Job) {
        let mut state = self.queue.state.lock().unwrap();
        state.jobs.push_back(job);
        self.queue.ready.notify_one();
    }

    /// Drain remaining jobs and join every worker.
    pub(crate) fn shutdown(self) {
        {
            let mut state = self.queue.state.lock().unwrap();
            state.join = true;
            self.queue.ready.notify_all();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads.len())
            .finish()
    }
}
