//! Compensating-action stack for transactional setup
//!
//! Each provisioning step pushes a closure that undoes it. On failure the
//! stack is unwound in LIFO order; on success `commit` discards it.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Compensator = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// LIFO stack of compensating actions.
pub struct UndoStack {
    steps: Vec<(String, Compensator)>,
}

impl UndoStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Push a compensating action for a completed step.
    ///
    /// The label identifies the step in logs and aggregate errors.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.steps.push((label.into(), Box::new(action)));
    }

    /// Number of pending compensating actions
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the stack holds no actions
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Discard all compensating actions after a successful setup
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Run every compensating action in LIFO order.
    ///
    /// Each action is attempted even if an earlier one failed. Returns the
    /// labelled failures, empty when the rollback was clean.
    pub async fn undo_all(mut self) -> Vec<(String, Error)> {
        let mut failures = Vec::new();

        while let Some((label, action)) = self.steps.pop() {
            debug!("Rolling back: {}", label);
            if let Err(e) = action().await {
                warn!("Rollback step '{}' failed: {}", label, e);
                failures.push((label, e));
            }
        }

        failures
    }

    /// Combine a triggering error with rollback failures.
    ///
    /// A clean rollback surfaces the trigger unchanged; otherwise the
    /// trigger and every undo failure travel together.
    pub fn rollback_error(trigger: Error, failures: Vec<(String, Error)>) -> Error {
        if failures.is_empty() {
            trigger
        } else {
            Error::Aggregate {
                source: Box::new(trigger),
                undo_errors: failures,
            }
        }
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<()>> {
        let log = log.clone();
        move || -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                log.lock().unwrap().push(name);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_undo_runs_in_lifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut undo = UndoStack::new();

        undo.push("first", recorder(&log, "first"));
        undo.push("second", recorder(&log, "second"));
        undo.push("third", recorder(&log, "third"));
        assert_eq!(undo.len(), 3);

        let failures = undo.undo_all().await;
        assert!(failures.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_commit_discards_actions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut undo = UndoStack::new();

        undo.push("only", recorder(&log, "only"));
        undo.commit();

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_collected_and_later_steps_still_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut undo = UndoStack::new();

        undo.push("first", recorder(&log, "first"));
        undo.push("broken", || {
            Box::pin(async { Err(Error::ResourceMissing("gone".into())) })
        });
        undo.push("third", recorder(&log, "third"));

        let failures = undo.undo_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        // The step below the broken one was still attempted
        assert_eq!(*log.lock().unwrap(), vec!["third", "first"]);
    }

    #[test]
    fn test_rollback_error_aggregates() {
        let clean = UndoStack::rollback_error(Error::InvalidInput("bad".into()), Vec::new());
        assert!(matches!(clean, Error::InvalidInput(_)));

        let aggregated = UndoStack::rollback_error(
            Error::InvalidInput("bad".into()),
            vec![("delete user".into(), Error::ResourceMissing("user".into()))],
        );
        match aggregated {
            Error::Aggregate { source, undo_errors } => {
                assert!(matches!(*source, Error::InvalidInput(_)));
                assert_eq!(undo_errors.len(), 1);
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }
}
