//! Background maintenance worker
//!
//! `clear` and `recycle` never run on the caller's thread. They are queued
//! to one worker thread per registry set. Each job reports back through a
//! [`MaintenanceTicket`] the caller may wait on or drop, and failures are
//! also logged and broadcast to anyone subscribed.

use crate::error::{CacheError, Result};
use crate::namespace::Namespace;
use crate::registry::CacheRegistry;
use crate::strategy::StorageMode;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc, oneshot};

const FAILURE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    Clear,
    Recycle,
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str("clear"),
            Self::Recycle => f.write_str("recycle"),
        }
    }
}

/// A background job that did not complete
#[derive(Debug, Clone)]
pub struct MaintenanceFailure {
    pub namespace: Namespace,
    pub mode: StorageMode,
    pub task: MaintenanceTask,
    pub message: String,
}

enum Job {
    Run {
        registry: Arc<CacheRegistry>,
        task: MaintenanceTask,
        done: Option<oneshot::Sender<Result<usize>>>,
    },
    Shutdown,
}

/// Outcome of a queued maintenance job: how many entries it destroyed.
///
/// Dropping the ticket leaves the job running.
#[must_use = "drop the ticket explicitly to fire and forget"]
pub struct MaintenanceTicket {
    rx: oneshot::Receiver<Result<usize>>,
}

impl MaintenanceTicket {
    /// Block until the job finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread driving a tokio runtime (inside
    /// `#[tokio::main]`, `#[tokio::test]` or a spawned task). Async callers
    /// `.await` the ticket instead.
    pub fn wait(self) -> Result<usize> {
        self.rx.blocking_recv().unwrap_or(Err(CacheError::ShutDown))
    }

    /// Let the job run without observing it
    pub fn detach(self) {}

    /// A ticket already resolved to `ShutDown`
    pub(crate) fn rejected() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(CacheError::ShutDown));
        Self { rx }
    }
}

impl Future for MaintenanceTicket {
    type Output = Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(CacheError::ShutDown)))
    }
}

/// Sending side of the work queue, held by every registry
#[derive(Clone)]
pub(crate) struct MaintenanceHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl MaintenanceHandle {
    /// Queue `task` and hand back a ticket for its outcome
    pub(crate) fn submit(&self, registry: Arc<CacheRegistry>, task: MaintenanceTask) -> MaintenanceTicket {
        let (done, rx) = oneshot::channel();
        let job = Job::Run {
            registry,
            task,
            done: Some(done),
        };
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            reject(job);
        }
        MaintenanceTicket { rx }
    }

    /// Queue `task` with nobody waiting. Returns false once shut down.
    pub(crate) fn submit_detached(&self, registry: Arc<CacheRegistry>, task: MaintenanceTask) -> bool {
        let job = Job::Run {
            registry,
            task,
            done: None,
        };
        self.tx.send(job).is_ok()
    }
}

fn reject(job: Job) {
    if let Job::Run { done: Some(done), .. } = job {
        let _ = done.send(Err(CacheError::ShutDown));
    }
}

pub(crate) struct MaintenanceWorker {
    handle: MaintenanceHandle,
    failures: broadcast::Sender<MaintenanceFailure>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceWorker {
    pub(crate) fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let sink = failures.clone();
        let thread = std::thread::Builder::new()
            .name("veil-maintenance".into())
            .spawn(move || run(rx, sink))
            .map_err(CacheError::Worker)?;

        Ok(Self {
            handle: MaintenanceHandle { tx },
            failures,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn handle(&self) -> MaintenanceHandle {
        self.handle.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<MaintenanceFailure> {
        self.failures.subscribe()
    }

    /// Finish queued jobs, then stop. Idempotent.
    pub(crate) fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.handle.tx.send(Job::Shutdown);
        if thread.join().is_err() {
            tracing::error!("maintenance worker panicked");
        }
    }
}

fn run(mut rx: mpsc::UnboundedReceiver<Job>, failures: broadcast::Sender<MaintenanceFailure>) {
    tracing::debug!("maintenance worker started");

    while let Some(job) = rx.blocking_recv() {
        let (registry, task, done) = match job {
            Job::Run { registry, task, done } => (registry, task, done),
            Job::Shutdown => break,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match task {
            MaintenanceTask::Clear => registry.clear_now(),
            MaintenanceTask::Recycle => registry.sweep_expired(),
        }));

        let result = match outcome {
            Ok(destroyed) => {
                tracing::debug!(
                    namespace = %registry.namespace(),
                    mode = %registry.mode(),
                    %task,
                    destroyed,
                    "maintenance job finished"
                );
                Ok(destroyed)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    namespace = %registry.namespace(),
                    mode = %registry.mode(),
                    %task,
                    %message,
                    "maintenance job failed"
                );
                let _ = failures.send(MaintenanceFailure {
                    namespace: registry.namespace().clone(),
                    mode: registry.mode(),
                    task,
                    message: message.clone(),
                });
                Err(CacheError::Maintenance { task, message })
            }
        };

        if let Some(done) = done {
            let _ = done.send(result);
        }
    }

    // Anything still queued after shutdown is answered, not dropped silently
    rx.close();
    while let Ok(job) = rx.try_recv() {
        reject(job);
    }
    tracing::debug!("maintenance worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use crate::strategy::StorageStrategy;
    use std::time::Duration;
    use veil_crypto::CipherContext;
    use veil_store::ChunkStore;

    /// Accepts entries but cannot destroy them
    struct StuckWipe;

    impl StorageStrategy for StuckWipe {
        fn on_adding(&self, _entry: &CacheEntry) -> Result<()> {
            Ok(())
        }

        fn on_removed(&self, _entry: &CacheEntry) {
            panic!("wipe refused");
        }
    }

    fn stuck_registry(worker: &MaintenanceWorker) -> Arc<CacheRegistry> {
        let registry = CacheRegistry::with_strategy(
            "stuck".into(),
            StorageMode::Memory,
            Box::new(StuckWipe),
            Duration::from_secs(60),
            worker.handle(),
        );
        let store = ChunkStore::new(Arc::new(CipherContext::new().unwrap()));
        store.append(b"x").unwrap();
        registry.add(CacheEntry::bind("a", store)).unwrap();
        registry
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert!(panic_message(payload.as_ref()).contains("non-string"));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let worker = MaintenanceWorker::spawn().unwrap();
        worker.shutdown();
        worker.shutdown();
    }

    #[test]
    fn test_task_display() {
        assert_eq!(MaintenanceTask::Clear.to_string(), "clear");
        assert_eq!(MaintenanceTask::Recycle.to_string(), "recycle");
    }

    #[test]
    fn test_failed_job_is_reported() {
        let worker = MaintenanceWorker::spawn().unwrap();
        let mut failures = worker.subscribe();
        let registry = stuck_registry(&worker);

        match registry.clear().wait() {
            Err(CacheError::Maintenance { task, message }) => {
                assert_eq!(task, MaintenanceTask::Clear);
                assert_eq!(message, "wipe refused");
            }
            other => panic!("expected a maintenance failure, got {other:?}"),
        }

        // Published before the ticket resolved
        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.namespace, Namespace::from("stuck"));
        assert_eq!(failure.mode, StorageMode::Memory);
        assert_eq!(failure.task, MaintenanceTask::Clear);
        assert_eq!(failure.message, "wipe refused");
        worker.shutdown();
    }

    #[test]
    fn test_worker_survives_failed_job() {
        let worker = MaintenanceWorker::spawn().unwrap();
        let registry = stuck_registry(&worker);

        assert!(registry.clear().wait().is_err());
        assert_eq!(registry.recycle().wait().unwrap(), 0);
        worker.shutdown();
    }

    #[tokio::test]
    #[should_panic]
    async fn test_wait_panics_on_runtime_thread() {
        let worker = MaintenanceWorker::spawn().unwrap();
        let registry = CacheRegistry::new(
            "async".into(),
            StorageMode::Memory,
            Duration::from_secs(60),
            worker.handle(),
        );
        let _ = registry.recycle().wait();
    }
}
