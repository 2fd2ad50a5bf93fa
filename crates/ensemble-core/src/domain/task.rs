use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::events::{Entity, EntityKind};
use super::ids::TaskId;
use super::state::TaskState;

/// A `source > target` data movement. A bare path stages to the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDirective {
    pub source: String,
    pub target: String,
}

impl StagingDirective {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let malformed = || ValidationError::StagingDirective(raw.to_string());
        match raw.split_once('>') {
            Some((source, target)) => {
                let (source, target) = (source.trim(), target.trim());
                if source.is_empty() || target.is_empty() || target.contains('>') {
                    return Err(malformed());
                }
                Ok(Self {
                    source: source.to_string(),
                    target: target.to_string(),
                })
            }
            None => {
                let path = raw.trim();
                if path.is_empty() {
                    return Err(malformed());
                }
                let target = path.rsplit('/').next().unwrap_or(path);
                Ok(Self {
                    source: path.to_string(),
                    target: target.to_string(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingDirectives {
    pub upload_input: Vec<String>,
    pub copy_input: Vec<String>,
    pub link_input: Vec<String>,
    pub download_output: Vec<String>,
    pub copy_output: Vec<String>,
}

impl StagingDirectives {
    /// Parse every directive, failing on the first malformed one.
    pub fn parsed(&self) -> Result<Vec<StagingDirective>, ValidationError> {
        self.upload_input
            .iter()
            .chain(&self.copy_input)
            .chain(&self.link_input)
            .chain(&self.download_output)
            .chain(&self.copy_output)
            .map(|raw| StagingDirective::parse(raw))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuRequirements {
    pub processes: u32,
    pub threads_per_process: u32,
    pub uses_mpi: bool,
}

impl Default for CpuRequirements {
    fn default() -> Self {
        Self {
            processes: 1,
            threads_per_process: 1,
            uses_mpi: false,
        }
    }
}

/// Everything the resource runtime needs to run a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionDescriptor {
    pub executable: String,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub pre_exec: Vec<String>,
    pub post_exec: Vec<String>,
    pub cpu_reqs: CpuRequirements,
    pub staging: StagingDirectives,
}

/// A unit of work.
///
/// Serialized as a flat mapping; a pending-queue message is a JSON array of
/// these. The parent references are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    uid: TaskId,
    pub name: String,
    #[serde(default)]
    pub state: TaskState,
    parent_stage: String,
    parent_pipeline: String,
    /// Execution location on the resource; filled in once submitted.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub execution: ExecutionDescriptor,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        parent_stage: impl Into<String>,
        parent_pipeline: impl Into<String>,
        execution: ExecutionDescriptor,
    ) -> Self {
        Self::with_uid(TaskId::generate(), name, parent_stage, parent_pipeline, execution)
    }

    /// Like [`Task::new`], with a uid the caller minted (usually through the
    /// session's `IdGenerator`).
    pub fn with_uid(
        uid: TaskId,
        name: impl Into<String>,
        parent_stage: impl Into<String>,
        parent_pipeline: impl Into<String>,
        execution: ExecutionDescriptor,
    ) -> Self {
        Self {
            uid,
            name: name.into(),
            state: TaskState::Described,
            parent_stage: parent_stage.into(),
            parent_pipeline: parent_pipeline.into(),
            path: None,
            execution,
        }
    }

    pub fn uid(&self) -> TaskId {
        self.uid
    }

    pub fn parent_stage(&self) -> &str {
        &self.parent_stage
    }

    pub fn parent_pipeline(&self) -> &str {
        &self.parent_pipeline
    }
}

impl Entity for Task {
    type State = TaskState;

    const KIND: EntityKind = EntityKind::Task;

    fn uid(&self) -> String {
        self.uid.to_string()
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_decodes_from_minimal_mapping() {
        let uid = TaskId::generate();
        let json = serde_json::json!({
            "uid": uid,
            "name": "t1",
            "parent_stage": "stage-1",
            "parent_pipeline": "p1",
            "execution": { "executable": "/bin/date" }
        });

        let task: Task = serde_json::from_value(json).unwrap();

        assert_eq!(task.uid(), uid);
        assert_eq!(task.state, TaskState::Described);
        assert_eq!(task.parent_stage(), "stage-1");
        assert_eq!(task.execution.cpu_reqs, CpuRequirements::default());
        assert!(task.path.is_none());
    }

    #[test]
    fn with_uid_keeps_the_given_uid() {
        let uid = TaskId::generate();
        let task = Task::with_uid(uid, "t1", "s1", "p1", ExecutionDescriptor::default());

        assert_eq!(task.uid(), uid);
        assert_eq!(task.state, TaskState::Described);
        assert_eq!(task.parent_pipeline(), "p1");
    }

    #[test]
    fn staging_directive_forms() {
        let explicit = StagingDirective::parse("./input_file.txt > temp.txt").unwrap();
        assert_eq!(explicit.source, "./input_file.txt");
        assert_eq!(explicit.target, "temp.txt");

        let bare = StagingDirective::parse("data/in.dat").unwrap();
        assert_eq!(bare.target, "in.dat");

        assert!(StagingDirective::parse(" > x").is_err());
        assert!(StagingDirective::parse("a > b > c").is_err());
    }

    #[test]
    fn parsed_reports_first_malformed_directive() {
        let staging = StagingDirectives {
            upload_input: vec!["a > b".into()],
            download_output: vec![">".into()],
            ..Default::default()
        };
        assert_eq!(
            staging.parsed().unwrap_err(),
            ValidationError::StagingDirective(">".into())
        );
    }
}
