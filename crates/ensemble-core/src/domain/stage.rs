//! Stages and pipelines: ordered groups whose state is derived from their
//! children, never set by the dispatch core.

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::events::{Entity, EntityKind};
use super::ids::{PipelineId, StageId};
use super::state::{EntityState, PipelineState, StageState, TaskState};
use super::task::Task;

/// Outcome of a set of finished children. Failure beats cancellation beats
/// success.
fn final_outcome<S: EntityState>(
    states: impl Iterator<Item = S>,
    failed: S,
    canceled: S,
    done: S,
) -> S {
    let mut outcome = done;
    for state in states {
        if state == failed {
            return failed;
        }
        if state == canceled {
            outcome = canceled;
        }
    }
    outcome
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    uid: StageId,
    pub name: String,
    pub state: StageState,
    parent_pipeline: String,
    tasks: Vec<Task>,
}

impl Stage {
    pub fn new(name: impl Into<String>, parent_pipeline: impl Into<String>) -> Self {
        Self {
            uid: StageId::generate(),
            name: name.into(),
            state: StageState::Described,
            parent_pipeline: parent_pipeline.into(),
            tasks: Vec::new(),
        }
    }

    pub fn uid(&self) -> StageId {
        self.uid
    }

    pub fn parent_pipeline(&self) -> &str {
        &self.parent_pipeline
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Take ownership of a task created for this stage. Its staging
    /// directives must parse.
    pub fn add_task(&mut self, task: Task) -> Result<(), ValidationError> {
        if task.parent_stage() != self.name || task.parent_pipeline() != self.parent_pipeline {
            return Err(ValidationError::ForeignChild {
                child: task.uid().to_string(),
                expected: format!("{}/{}", self.parent_pipeline, self.name),
                actual: format!("{}/{}", task.parent_pipeline(), task.parent_stage()),
            });
        }
        task.execution.staging.parsed()?;
        self.tasks.push(task);
        Ok(())
    }

    /// Replace a task with a newer copy of itself (e.g. one that came back
    /// on the completed queue). Returns false when the uid is unknown.
    pub fn update_task(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|t| t.uid() == task.uid()) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn derive_state(&self) -> StageState {
        if self.tasks.is_empty() {
            return self.state;
        }
        if self.tasks.iter().all(|t| t.state.is_terminal()) {
            return match final_outcome(
                self.tasks.iter().map(|t| t.state),
                TaskState::Failed,
                TaskState::Canceled,
                TaskState::Done,
            ) {
                TaskState::Failed => StageState::Failed,
                TaskState::Canceled => StageState::Canceled,
                _ => StageState::Done,
            };
        }
        let min_rank = self.tasks.iter().map(|t| t.state.rank()).min().unwrap_or(0);
        if min_rank >= StageState::Scheduled.rank() {
            StageState::Scheduled
        } else if self
            .tasks
            .iter()
            .any(|t| t.state.rank() >= StageState::Scheduling.rank())
        {
            StageState::Scheduling
        } else {
            StageState::Described
        }
    }

    /// Apply the derived state. Returns the new state if it changed.
    pub fn refresh_state(&mut self) -> Option<StageState> {
        let derived = self.derive_state();
        (derived != self.state).then(|| {
            self.state = derived;
            derived
        })
    }
}

impl Entity for Stage {
    type State = StageState;

    const KIND: EntityKind = EntityKind::Stage;

    fn uid(&self) -> String {
        self.uid.to_string()
    }

    fn state(&self) -> StageState {
        self.state
    }

    fn set_state(&mut self, state: StageState) {
        self.state = state;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    uid: PipelineId,
    pub name: String,
    pub state: PipelineState,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: PipelineId::generate(),
            name: name.into(),
            state: PipelineState::Described,
            stages: Vec::new(),
        }
    }

    pub fn uid(&self) -> PipelineId {
        self.uid
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut [Stage] {
        &mut self.stages
    }

    pub fn add_stage(&mut self, stage: Stage) -> Result<(), ValidationError> {
        if stage.parent_pipeline() != self.name {
            return Err(ValidationError::ForeignChild {
                child: stage.uid().to_string(),
                expected: self.name.clone(),
                actual: stage.parent_pipeline().to_string(),
            });
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn derive_state(&self) -> PipelineState {
        if self.stages.is_empty() {
            return self.state;
        }
        let stage_states = self.stages.iter().map(Stage::derive_state);
        if stage_states.clone().all(|s| s.is_terminal()) {
            return match final_outcome(
                stage_states,
                StageState::Failed,
                StageState::Canceled,
                StageState::Done,
            ) {
                StageState::Failed => PipelineState::Failed,
                StageState::Canceled => PipelineState::Canceled,
                _ => PipelineState::Done,
            };
        }
        if stage_states
            .clone()
            .any(|s| s.rank() >= PipelineState::Scheduling.rank())
        {
            PipelineState::Scheduling
        } else {
            PipelineState::Described
        }
    }

    /// Refresh every stage, then the pipeline itself.
    pub fn refresh_state(&mut self) -> Option<PipelineState> {
        for stage in &mut self.stages {
            stage.refresh_state();
        }
        let derived = self.derive_state();
        (derived != self.state).then(|| {
            self.state = derived;
            derived
        })
    }
}

impl Entity for Pipeline {
    type State = PipelineState;

    const KIND: EntityKind = EntityKind::Pipeline;

    fn uid(&self) -> String {
        self.uid.to_string()
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionDescriptor;

    fn stage_with(states: &[TaskState]) -> Stage {
        let mut stage = Stage::new("s1", "p1");
        for (i, state) in states.iter().enumerate() {
            let mut task = Task::new(format!("t{i}"), "s1", "p1", ExecutionDescriptor::default());
            task.state = *state;
            stage.add_task(task).unwrap();
        }
        stage
    }

    #[test]
    fn add_task_rejects_foreign_task() {
        let mut stage = Stage::new("s1", "p1");
        let task = Task::new("t", "s2", "p1", ExecutionDescriptor::default());
        let err = stage.add_task(task).unwrap_err();
        assert!(matches!(err, ValidationError::ForeignChild { .. }));
        assert!(stage.tasks().is_empty());
    }

    #[test]
    fn add_task_rejects_malformed_staging() {
        let mut stage = Stage::new("s1", "p1");
        let mut execution = ExecutionDescriptor::default();
        execution.staging.copy_input = vec!["a > b > c".into()];
        let task = Task::new("t", "s1", "p1", execution);

        let err = stage.add_task(task).unwrap_err();

        assert_eq!(err, ValidationError::StagingDirective("a > b > c".into()));
        assert!(stage.tasks().is_empty());
    }

    #[test]
    fn stage_state_follows_slowest_task() {
        assert_eq!(
            stage_with(&[TaskState::Described, TaskState::Described]).derive_state(),
            StageState::Described
        );
        assert_eq!(
            stage_with(&[TaskState::Scheduling, TaskState::Described]).derive_state(),
            StageState::Scheduling
        );
        assert_eq!(
            stage_with(&[TaskState::Executed, TaskState::Scheduled]).derive_state(),
            StageState::Scheduled
        );
    }

    #[test]
    fn finished_stage_reports_worst_outcome() {
        assert_eq!(
            stage_with(&[TaskState::Done, TaskState::Done]).derive_state(),
            StageState::Done
        );
        assert_eq!(
            stage_with(&[TaskState::Canceled, TaskState::Done]).derive_state(),
            StageState::Canceled
        );
        assert_eq!(
            stage_with(&[TaskState::Canceled, TaskState::Failed]).derive_state(),
            StageState::Failed
        );
    }

    #[test]
    fn pipeline_aggregates_stages() {
        let mut pipeline = Pipeline::new("p1");
        pipeline.add_stage(stage_with(&[TaskState::Done])).unwrap();
        let mut second = Stage::new("s2", "p1");
        second
            .add_task(Task::new("t", "s2", "p1", ExecutionDescriptor::default()))
            .unwrap();
        pipeline.add_stage(second).unwrap();

        assert_eq!(pipeline.refresh_state(), Some(PipelineState::Scheduling));
        assert_eq!(pipeline.stages()[0].state, StageState::Done);

        let stage = &mut pipeline.stages_mut()[1];
        let mut task = stage.tasks()[0].clone();
        task.state = TaskState::Done;
        assert!(stage.update_task(task));

        assert_eq!(pipeline.refresh_state(), Some(PipelineState::Done));
        assert_eq!(pipeline.refresh_state(), None);
    }

    #[test]
    fn add_stage_rejects_foreign_stage() {
        let mut pipeline = Pipeline::new("p1");
        let err = pipeline.add_stage(Stage::new("s", "p2")).unwrap_err();
        assert!(matches!(err, ValidationError::ForeignChild { .. }));
    }
}
