//! The task contract: check, confirm, action, start.
//!
//! A [`Task`] is a named unit of work with a two-phase
//! verify-then-mutate contract. `check` decides whether the world
//! already satisfies the task's postcondition; when it does not, the
//! operator is consulted through `confirm` before `action` is allowed
//! to mutate anything. The core correctness invariant is
//! *convergence*: immediately after `action`, `check` on the resulting
//! state must pass.

mod wrapper;

pub use wrapper::FnTask;

use crate::errors::{StateShapeError, SyncError};
use crate::prompt::{confirm_strict, Prompter};
use crate::state::PipelineState;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything a diverged check hands to `action`.
///
/// The explicit replacement for hidden per-instance scratch fields:
/// whatever `check` fetched or computed (fresh collections, diffs)
/// travels here, keeping tasks pure between calls and safe to reuse
/// across runs.
pub type Findings = HashMap<String, Value>;

/// The verdict of a task's `check` phase.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckReport {
    /// The world already satisfies the task's postcondition.
    Converged,
    /// Corrective work is needed.
    Diverged(Divergence),
}

/// Why a check failed, plus the data `action` needs to correct it.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    /// One-line human-readable summary, logged and reported on cancel.
    pub summary: String,
    /// Data threaded into `action`.
    pub findings: Findings,
}

impl Divergence {
    /// Creates a divergence with an empty findings map.
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            findings: Findings::new(),
        }
    }

    /// Attaches a finding.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be encoded.
    pub fn with_finding<T: serde::Serialize>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, SyncError> {
        self.findings.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }
}

/// Reads a typed value out of a findings map.
///
/// # Errors
///
/// Returns [`StateShapeError`] when the finding is absent or does not
/// deserialize into `T`, which means `check` and `action` disagree
/// about the task's own contract.
pub fn read_finding<T: DeserializeOwned>(findings: &Findings, key: &str) -> Result<T, SyncError> {
    let value = findings
        .get(key)
        .ok_or_else(|| StateShapeError::missing(key))?;
    serde_json::from_value(value.clone())
        .map_err(|err| StateShapeError::malformed(key, err.to_string()).into())
}

/// What `start` hands back to the pipeline.
///
/// Cancellation is a tagged variant, never a sentinel value, so it can
/// never collide with a legitimate state document.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task converged (or was corrected); here is the next state.
    Advanced(PipelineState),
    /// The gate declined; stop the pipeline, run nothing further.
    Canceled(Cancellation),
}

/// Which task canceled and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    /// Name of the canceling task.
    pub task: String,
    /// The divergence summary that was not confirmed past.
    pub reason: String,
}

impl Cancellation {
    /// Creates a cancellation record.
    #[must_use]
    pub fn new(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

/// Per-run context shared by every task in a pipeline.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    prompter: Arc<dyn Prompter>,
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            prompter,
        }
    }

    /// The unique id of this pipeline run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The confirmation capability.
    #[must_use]
    pub fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }
}

/// A named unit of work with the check/confirm/action contract.
///
/// Implementors override `check`, `action`, usually `reads`/`writes`,
/// and sometimes `confirm`; `start` is provided and should rarely be
/// overridden (the [`Pipeline`](crate::pipeline::Pipeline) composite
/// is the exception).
#[async_trait]
pub trait Task: Send + Sync + Debug {
    /// Diagnostic label, logged on every phase.
    fn name(&self) -> &str;

    /// State keys this task requires before it runs.
    ///
    /// Checked at assembly time by
    /// [`Pipeline::validate`](crate::pipeline::Pipeline::validate).
    fn reads(&self) -> Vec<String> {
        Vec::new()
    }

    /// State keys this task produces or replaces.
    fn writes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Decides whether the world already satisfies this task's
    /// postcondition. Default: always converged (no-op task).
    ///
    /// # Errors
    ///
    /// May fail with a service or state-shape error; both abort the
    /// whole run.
    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let _ = state;
        Ok(CheckReport::Converged)
    }

    /// Consulted only when `check` diverged. Default: the strict
    /// two-step gate: yes/no plus retyping the confirmation phrase.
    ///
    /// # Errors
    ///
    /// Propagates prompt-channel errors.
    async fn confirm(&self, ctx: &RunContext, divergence: &Divergence) -> Result<bool, SyncError> {
        let _ = divergence;
        confirm_strict(ctx.prompter()).await
    }

    /// Performs the corrective effect and returns the new state.
    /// Default: returns the state unchanged (pure invariant checks).
    ///
    /// Must converge: re-running `check` on the returned state must
    /// report [`CheckReport::Converged`].
    ///
    /// # Errors
    ///
    /// May fail with a service, IO, or state-shape error.
    async fn action(
        &self,
        state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let _ = findings;
        Ok(state)
    }

    /// Composes this task with `next`, yielding a pipeline value.
    ///
    /// Both a bare task and a pipeline compose with the same
    /// by-value `pipe` call, so chains read left-to-right without a
    /// separate builder type and never alias a shared series.
    fn pipe<T>(self, next: T) -> crate::pipeline::Pipeline
    where
        Self: Sized + 'static,
        T: Task + 'static,
    {
        crate::pipeline::Pipeline::new("pipeline")
            .pipe(self)
            .pipe(next)
    }

    /// Orchestrates check → confirm → action.
    ///
    /// A converged check returns the state untouched without invoking
    /// `action`; a diverged check runs `action` only if the gate
    /// passes, and otherwise reports cancellation.
    ///
    /// # Errors
    ///
    /// Propagates any phase failure; cancellation is not an error.
    async fn start(
        &self,
        ctx: &RunContext,
        state: PipelineState,
    ) -> Result<TaskOutcome, SyncError> {
        info!(task = self.name(), "starting");
        let divergence = match self.check(&state).await? {
            CheckReport::Converged => {
                info!(task = self.name(), "already converged");
                return Ok(TaskOutcome::Advanced(state));
            }
            CheckReport::Diverged(divergence) => divergence,
        };
        info!(task = self.name(), summary = %divergence.summary, "check diverged");
        if self.confirm(ctx, &divergence).await? {
            let state = self.action(state, &divergence.findings).await?;
            info!(task = self.name(), "finished");
            Ok(TaskOutcome::Advanced(state))
        } else {
            warn!(task = self.name(), "canceled due to failed checks");
            Ok(TaskOutcome::Canceled(Cancellation::new(
                self.name(),
                divergence.summary,
            )))
        }
    }
}
