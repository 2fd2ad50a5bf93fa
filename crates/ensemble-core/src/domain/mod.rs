//! Domain model: ids, ranked states, tasks / stages / pipelines, sync events,
//! resource descriptions and kernel templates.

pub mod errors;
pub mod events;
pub mod ids;
pub mod kernel;
pub mod resource;
pub mod stage;
pub mod state;
pub mod task;

pub use self::errors::{
    BrokerError, ConfigError, EngineError, Severity, TransitionError, ValidationError,
};
pub use self::events::{Entity, EntityKind, SyncEvent};
pub use self::ids::{PipelineId, SessionId, StageId, TaskId};
pub use self::kernel::{
    BoundKernel, KernelArgument, KernelTemplate, MachineConfig, hello_kernel,
    resolve_machine_config,
};
pub use self::resource::ResourceDescription;
pub use self::stage::{Pipeline, Stage};
pub use self::state::{
    EntityState, PipelineState, Progression, StageState, TaskState, classify,
};
pub use self::task::{
    CpuRequirements, ExecutionDescriptor, StagingDirective, StagingDirectives, Task,
};
