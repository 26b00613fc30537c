//! Sequential task composition with short-circuit cancellation.

use crate::errors::{AssemblyError, SyncError};
use crate::state::PipelineState;
use crate::task::{RunContext, Task, TaskOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, warn};

/// An ordered composition of tasks sharing one state document.
///
/// A pipeline is itself a [`Task`], so pipelines nest; an inner
/// cancellation propagates outward unchanged. Composition is a single
/// immutable-builder surface: [`Pipeline::pipe`] consumes the pipeline
/// and returns the extended one, so there is no aliasing between a
/// pipeline and its extensions.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    tasks: Vec<Box<dyn Task>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Appends a task, returning the extended pipeline.
    #[must_use]
    pub fn pipe(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    /// Number of directly contained tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the pipeline contains no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Verifies at assembly time that every task's declared reads are
    /// satisfied by an earlier task's writes or by `initial_keys`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] naming the first unsatisfied read.
    pub fn validate(&self, initial_keys: &[&str]) -> Result<(), SyncError> {
        let mut available: HashSet<String> =
            initial_keys.iter().map(ToString::to_string).collect();
        for task in &self.tasks {
            for key in task.reads() {
                if !available.contains(&key) {
                    return Err(AssemblyError::new(task.name(), key).into());
                }
            }
            available.extend(task.writes());
        }
        Ok(())
    }
}

#[async_trait]
impl Task for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    /// Keys the pipeline needs from outside: reads of its children not
    /// satisfied by an earlier child's writes.
    fn reads(&self) -> Vec<String> {
        let mut produced: HashSet<String> = HashSet::new();
        let mut external = Vec::new();
        for task in &self.tasks {
            for key in task.reads() {
                if !produced.contains(&key) && !external.contains(&key) {
                    external.push(key);
                }
            }
            produced.extend(task.writes());
        }
        external
    }

    fn writes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for task in &self.tasks {
            for key in task.writes() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Drives each child in order, threading the state forward. The
    /// first cancellation stops everything: short-circuit, not
    /// skip-and-continue.
    async fn start(
        &self,
        ctx: &RunContext,
        state: PipelineState,
    ) -> Result<TaskOutcome, SyncError> {
        info!(pipeline = %self.name, run_id = %ctx.run_id(), tasks = self.tasks.len(), "pipeline starting");
        let mut state = state;
        for task in &self.tasks {
            match task.start(ctx, state).await? {
                TaskOutcome::Advanced(next) => state = next,
                TaskOutcome::Canceled(cancellation) => {
                    warn!(
                        pipeline = %self.name,
                        task = %cancellation.task,
                        reason = %cancellation.reason,
                        "pipeline canceled"
                    );
                    return Ok(TaskOutcome::Canceled(cancellation));
                }
            }
        }
        info!(pipeline = %self.name, run_id = %ctx.run_id(), "pipeline finished");
        Ok(TaskOutcome::Advanced(state))
    }
}
