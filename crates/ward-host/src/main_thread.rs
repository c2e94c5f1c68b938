//! Single logical thread for every host-visible mutation.
//!
//! Overlay enactment, display-name writes and visual-group writes must never
//! run concurrently with each other. Callers on worker threads or async tasks
//! submit jobs here and await their results; jobs run in FIFO order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::oneshot;

pub const MAIN_THREAD_NAME: &str = "ward-main";

type Job = Box<dyn FnOnce() + Send + 'static>;

enum MainThreadMessage {
    Run(Job),
    Stop,
}

/// Errors returned when a job cannot be executed on the main thread.
#[derive(Debug, Error)]
pub enum MainThreadError {
    #[error("failed to spawn main thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("main thread has stopped")]
    Stopped,
    #[error("main thread dropped the job before it returned a result")]
    Dropped,
}

/// Cloneable handle to the main thread.
#[derive(Clone)]
pub struct MainThread {
    inner: Arc<MainThreadInner>,
}

struct MainThreadInner {
    sender: Mutex<mpsc::Sender<MainThreadMessage>>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MainThread {
    pub fn spawn() -> Result<Self, MainThreadError> {
        Self::spawn_named(MAIN_THREAD_NAME)
    }

    pub fn spawn_named(name: &str) -> Result<Self, MainThreadError> {
        let (sender, receiver) = mpsc::channel::<MainThreadMessage>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_jobs(receiver))?;
        let thread_id = join.thread().id();
        tracing::debug!(thread = name, "main thread started");
        Ok(Self {
            inner: Arc::new(MainThreadInner {
                sender: Mutex::new(sender),
                thread_id,
                join: Mutex::new(Some(join)),
            }),
        })
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Runs `job` on the main thread and waits for its result.
    ///
    /// When already on the main thread the job runs inline.
    pub async fn call<R, F>(&self, job: F) -> Result<R, MainThreadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }
        let (sender, receiver) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = sender.send(job());
        }))?;
        receiver.await.map_err(|_| MainThreadError::Dropped)
    }

    /// Queues `job` without waiting for it.
    pub fn execute<F>(&self, job: F) -> Result<(), MainThreadError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(job))
    }

    /// Stops the thread after already-queued jobs and joins it.
    ///
    /// Blocks the caller; async callers should go through `spawn_blocking`.
    pub fn shutdown(&self) {
        if let Ok(sender) = self.inner.sender.lock() {
            let _ = sender.send(MainThreadMessage::Stop);
        }
        if self.is_current() {
            return;
        }
        let handle = self
            .inner
            .join
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("main thread terminated abnormally during shutdown");
            }
        }
    }

    fn submit(&self, job: Job) -> Result<(), MainThreadError> {
        let sender = self
            .inner
            .sender
            .lock()
            .map_err(|_| MainThreadError::Stopped)?;
        sender
            .send(MainThreadMessage::Run(job))
            .map_err(|_| MainThreadError::Stopped)
    }
}

impl std::fmt::Debug for MainThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThread")
            .field("thread_id", &self.inner.thread_id)
            .finish_non_exhaustive()
    }
}

fn run_jobs(receiver: mpsc::Receiver<MainThreadMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            MainThreadMessage::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("main thread job panicked; continuing with next job");
                }
            }
            MainThreadMessage::Stop => break,
        }
    }
    tracing::debug!("main thread stopped");
}
