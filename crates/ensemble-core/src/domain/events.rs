//! State-change events published on the session's sync queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::EntityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Task,
    Stage,
    Pipeline,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "Task",
            EntityKind::Stage => "Stage",
            EntityKind::Pipeline => "Pipeline",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that owns a ranked state and can be transitioned.
pub trait Entity {
    type State: EntityState;

    const KIND: EntityKind;

    fn uid(&self) -> String;

    fn state(&self) -> Self::State;

    fn set_state(&mut self, state: Self::State);
}

/// One observed transition, addressed to the controller.
///
/// Consumers must tolerate duplicates and must not assume these arrive in
/// lockstep with messages on the completed queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub uid: String,
    pub entity: EntityKind,
    pub state: String,
    pub rank: u8,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn for_entity<E: Entity>(entity: &E, timestamp: DateTime<Utc>) -> Self {
        let state = entity.state();
        Self {
            uid: entity.uid(),
            entity: E::KIND,
            state: state.as_str().to_string(),
            rank: state.rank(),
            timestamp,
        }
    }
}
