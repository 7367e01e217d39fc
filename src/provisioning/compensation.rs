//! Ordered undo list for multi-step provisioning.
//!
//! Each successful step pushes the action that reverses it. On a later
//! failure the list is drained newest-first. Undo actions are best-effort:
//! a failing undo is logged and reported in the outcome list, and draining
//! continues with the next one.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{error, info};

type UndoFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type UndoAction = Box<dyn FnOnce() -> UndoFuture + Send>;

/// Result of running one undo action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationOutcome {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompensationOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
pub struct Compensations {
    undo: Vec<(&'static str, UndoAction)>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the action that reverses the step that just succeeded.
    pub fn push<F, Fut, E>(&mut self, action: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.undo.push((
            action,
            Box::new(move || {
                Box::pin(async move { undo().await.map_err(|err| err.to_string()) })
            }),
        ));
    }

    /// Labels in the order they would run
    pub fn pending(&self) -> Vec<&'static str> {
        self.undo.iter().rev().map(|(action, _)| *action).collect()
    }

    /// Run every registered undo, newest first. Never retries.
    pub async fn drain(self) -> Vec<CompensationOutcome> {
        let mut outcomes = Vec::with_capacity(self.undo.len());
        for (action, undo) in self.undo.into_iter().rev() {
            match undo().await {
                Ok(()) => {
                    info!(action, "Compensation applied");
                    outcomes.push(CompensationOutcome {
                        action,
                        error: None,
                    });
                }
                Err(err) => {
                    error!(action, error = %err, "Compensation failed; resource may be orphaned");
                    outcomes.push(CompensationOutcome {
                        action,
                        error: Some(err),
                    });
                }
            }
        }
        outcomes
    }
}
