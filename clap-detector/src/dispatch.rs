/// Action dispatch
///
/// The detector does not look inside actions: it maps a final clap count to
/// one of two opaque descriptors and hands it to an `ActionDispatcher`.

use action_launcher::{Action, Launcher};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Action failed to launch: {0}")]
    Failed(String),
}

/// Which configured action a clap count selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Primary,
    Secondary,
}

/// Executes actions on behalf of the detector. Must not block for long:
/// it runs on the detection worker.
pub trait ActionDispatcher {
    type Action: fmt::Debug;

    fn execute(&self, action: &Self::Action) -> Result<(), DispatchError>;
}

/// Clap count to action mapping
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerActions<A> {
    pub primary_count: u32,
    pub primary: A,
    pub secondary_count: u32,
    pub secondary: A,
}

impl<A> TriggerActions<A> {
    pub fn new(primary_count: u32, primary: A, secondary_count: u32, secondary: A) -> Self {
        Self {
            primary_count,
            primary,
            secondary_count,
            secondary,
        }
    }

    /// Action for a final count; other counts are a no-op
    pub fn resolve(&self, count: u32) -> Option<(Trigger, &A)> {
        if count == self.primary_count {
            Some((Trigger::Primary, &self.primary))
        } else if count == self.secondary_count {
            Some((Trigger::Secondary, &self.secondary))
        } else {
            None
        }
    }
}

impl ActionDispatcher for Launcher {
    type Action = Action;

    fn execute(&self, action: &Action) -> Result<(), DispatchError> {
        if action.is_empty() {
            warn!("Action '{}' has no steps configured", action.description);
            return Ok(());
        }

        let report = Launcher::execute(self, action);
        if report.is_success() {
            return Ok(());
        }

        let failures: Vec<String> = report
            .failed
            .iter()
            .map(|(label, error)| format!("{}: {}", label, error))
            .collect();
        Err(DispatchError::Failed(failures.join("; ")))
    }
}
