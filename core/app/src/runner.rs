//! Background execution with a single in-flight operation.
//!
//! Operations run to completion on a blocking task. There is no
//! cancellation; a submitted operation always finishes or fails on its own.

use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::facade::Keycrypt;
use keycrypt_common::{Error, Result};

/// Identifier assigned to each submitted operation.
pub type OperationId = Uuid;

/// A submitted operation that has not been awaited yet.
pub struct PendingOperation<T> {
    id: OperationId,
    label: String,
    handle: JoinHandle<Result<T>>,
}

impl<T> PendingOperation<T> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the operation to finish.
    pub async fn wait(self) -> Result<T> {
        self.handle.await.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Operation {} did not complete: {}",
                self.label, e
            )))
        })?
    }
}

/// Runs [`Keycrypt`] operations one at a time off the caller's thread.
#[derive(Clone)]
pub struct OperationRunner {
    app: Arc<Mutex<Keycrypt>>,
    permit: Arc<Semaphore>,
}

impl OperationRunner {
    pub fn new(app: Keycrypt) -> Self {
        Self {
            app: Arc::new(Mutex::new(app)),
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Start `op` on a blocking task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `Busy` if another operation is still running
    pub fn try_submit<T, F>(&self, label: &str, op: F) -> Result<PendingOperation<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Keycrypt) -> Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permit).try_acquire_owned().map_err(|_| {
            Error::Busy(format!(
                "Cannot start {} while another operation is running",
                label
            ))
        })?;

        let id = Uuid::new_v4();
        let app = Arc::clone(&self.app);
        let task_label = label.to_string();
        info!(%id, operation = label, "Operation started");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut app = app.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let result = op(&mut app);
            match &result {
                Ok(_) => info!(%id, operation = %task_label, "Operation completed"),
                Err(e) => warn!(%id, operation = %task_label, error = %e, "Operation failed"),
            }
            result
        });

        Ok(PendingOperation {
            id,
            label: label.to_string(),
            handle,
        })
    }

    /// Submit `op` and wait for its result.
    pub async fn run<T, F>(&self, label: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Keycrypt) -> Result<T> + Send + 'static,
    {
        self.try_submit(label, op)?.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycrypt_common::ErrorKind;
    use keycrypt_vault::KeycryptConfig;
    use std::sync::mpsc;
    use tempfile::{tempdir, TempDir};

    fn runner() -> (TempDir, OperationRunner) {
        let home = tempdir().unwrap();
        let config = KeycryptConfig::new(home.path().join("keycrypt.db")).with_key_bits(2048);
        let app = Keycrypt::open(config).unwrap();
        (home, OperationRunner::new(app))
    }

    #[tokio::test]
    async fn test_second_submission_is_refused_while_busy() {
        let (_home, runner) = runner();
        let (release, wait_for_release) = mpsc::channel::<()>();

        let first = runner
            .try_submit("slow", move |_app| {
                wait_for_release.recv().ok();
                Ok(1)
            })
            .unwrap();
        assert!(runner.is_busy());

        let err = runner.try_submit("eager", |_app| Ok(2)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Busy);

        release.send(()).unwrap();
        assert_eq!(first.wait().await.unwrap(), 1);
        assert!(!runner.is_busy());

        assert_eq!(runner.run("next", |_app| Ok(3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_operation_errors_release_the_permit() {
        let (_home, runner) = runner();

        let err = runner
            .run("export", |app| {
                app.export_key_pair("missing", std::path::Path::new("."))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_operations_share_the_catalog() {
        let (_home, runner) = runner();

        let pending = runner
            .try_submit("generate", |app| app.generate_key_pair("bob", None, None))
            .unwrap();
        assert_eq!(pending.label(), "generate");
        assert!(!pending.id().is_nil());
        pending.wait().await.unwrap();

        let names = runner.run("show-keys", |app| app.key_pair_names()).await.unwrap();
        assert_eq!(names, vec!["bob"]);
    }
}
