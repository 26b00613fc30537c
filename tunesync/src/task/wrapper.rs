//! Function adapter: lifts a plain async function into the task
//! contract.

use super::{CheckReport, Divergence, Findings, Task};
use crate::errors::SyncError;
use crate::state::PipelineState;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Wraps a `(state) -> state` function as a task whose `check` always
/// diverges.
///
/// Ad hoc steps can join a pipeline without defining a task type, but
/// they still pass through the default strict two-step gate: a bare
/// function gives the engine no way to verify convergence, so it is
/// treated as destructive.
pub struct FnTask<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PipelineState, SyncError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTask<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PipelineState, SyncError>> + Send,
{
    /// Creates a new function task.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnTask<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PipelineState, SyncError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PipelineState, SyncError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _state: &PipelineState) -> Result<CheckReport, SyncError> {
        Ok(CheckReport::Diverged(Divergence::new(
            "ad hoc step always requires the gate",
        )))
    }

    async fn action(
        &self,
        state: PipelineState,
        _findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        (self.func)(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::STRICT_CONFIRM_PHRASE;
    use crate::task::{RunContext, TaskOutcome};
    use crate::testing::ScriptedPrompter;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn fn_task_runs_only_past_the_strict_gate() {
        let task = FnTask::new("stamp", |mut state: PipelineState| async move {
            state.insert("stamped", &true)?;
            Ok(state)
        });

        let declined = ScriptedPrompter::new();
        declined.answer_yes_no(false);
        let ctx = RunContext::new(Arc::new(declined));
        let outcome = task.start(&ctx, PipelineState::new()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Canceled(_)));

        let approved = ScriptedPrompter::new();
        approved.answer_yes_no(true);
        approved.type_phrase(STRICT_CONFIRM_PHRASE);
        let ctx = RunContext::new(Arc::new(approved));
        let outcome = task.start(&ctx, PipelineState::new()).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(state.get::<bool>("stamped").unwrap(), true);
    }
}
