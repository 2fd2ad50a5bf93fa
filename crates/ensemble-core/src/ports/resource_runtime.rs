//! ResourceRuntime port - the external system that actually runs tasks.

use async_trait::async_trait;

use crate::domain::{EngineError, Task};

/// Accepts fully described tasks and eventually hands them back finished.
///
/// The dispatch loop only relies on every returned task having run; it sets
/// the EXECUTED state itself.
#[async_trait]
pub trait ResourceRuntime: Send + Sync {
    async fn execute(&self, tasks: Vec<Task>) -> Result<Vec<Task>, EngineError>;
}
