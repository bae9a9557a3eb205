//! Registry of in-flight pipeline runs.
//!
//! Each background run is tracked by project id together with the handle
//! used to cancel it. Registration fails when the project already has an
//! active run, which is what makes "at most one pipeline per project" hold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{PipelineError, PipelineResult};

/// Receiving side of a cancellation request, threaded through every
/// suspension point of a run.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Sending side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct RunEntry {
    cancel: CancelHandle,
    task: Option<JoinHandle<()>>,
}

/// Project id → active run.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for `project_id` and return the signal its run must
    /// observe.
    pub fn register(&self, project_id: &str) -> PipelineResult<CancelSignal> {
        let mut runs = self.lock();
        if runs.contains_key(project_id) {
            return Err(PipelineError::AlreadyRunning(project_id.to_string()));
        }
        let (cancel, signal) = cancel_pair();
        runs.insert(project_id.to_string(), RunEntry { cancel, task: None });
        Ok(signal)
    }

    /// Attach the spawned task to a registered run. Ignored if the run has
    /// already finished and released its slot.
    pub fn attach(&self, project_id: &str, task: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(project_id) {
            entry.task = Some(task);
        }
    }

    /// Release the slot once the run is over.
    pub fn finish(&self, project_id: &str) {
        self.lock().remove(project_id);
    }

    /// Request cancellation. Returns `false` if the project has no active run.
    pub fn cancel(&self, project_id: &str) -> bool {
        match self.lock().get(project_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.lock().contains_key(project_id)
    }

    /// Take the task handle so the caller can await it.
    pub fn take_task(&self, project_id: &str) -> Option<JoinHandle<()>> {
        self.lock().get_mut(project_id).and_then(|e| e.task.take())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunEntry>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
