//! DummyRuntime - accepts tasks and reports them finished immediately.
//!
//! Nothing is executed. Only the execution-location placeholder is filled in,
//! so the dispatch path can be driven end to end without a real resource.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{EngineError, Task};
use crate::ports::ResourceRuntime;

#[derive(Debug, Clone)]
pub struct DummyRuntime {
    sandbox_root: String,
}

impl DummyRuntime {
    pub fn new() -> Self {
        Self {
            sandbox_root: "dummy://sandbox".to_string(),
        }
    }

    pub fn with_sandbox_root(root: impl Into<String>) -> Self {
        Self {
            sandbox_root: root.into(),
        }
    }

    fn sandbox_for(&self, task: &Task) -> String {
        format!(
            "{}/{}/{}/{}",
            self.sandbox_root,
            task.parent_pipeline(),
            task.parent_stage(),
            task.uid()
        )
    }
}

impl Default for DummyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceRuntime for DummyRuntime {
    async fn execute(&self, mut tasks: Vec<Task>) -> Result<Vec<Task>, EngineError> {
        for task in &mut tasks {
            task.path = Some(self.sandbox_for(task));
            debug!(task = %task.uid(), path = ?task.path, "dummy runtime accepted task");
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionDescriptor;

    #[tokio::test]
    async fn fills_execution_location() {
        let runtime = DummyRuntime::with_sandbox_root("file:///tmp/sb");
        let task = Task::new("t1", "s1", "p1", ExecutionDescriptor::default());
        let uid = task.uid();

        let done = runtime.execute(vec![task]).await.unwrap();

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].path, Some(format!("file:///tmp/sb/p1/s1/task.{}", uid.as_ulid())));
    }
}
