//! Application layer: the session context, transitions, the dispatch worker,
//! the heartbeat monitor and the lifecycle manager that owns both.

pub mod dispatch_loop;
pub mod heartbeat;
pub mod lifecycle;
pub mod session;
pub mod transition;

pub use self::dispatch_loop::{DispatchWorker, IterationReport, StepOutcome};
pub use self::heartbeat::{
    HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE, HeartbeatExit, HeartbeatMonitor, respond_to_heartbeat,
};
pub use self::lifecycle::LifecycleManager;
pub use self::session::{JournalEntry, QueuePurpose, SessionContext};
pub use self::transition::{RankPolicy, transition};
