//! State transitions and their sync events.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session::{QueuePurpose, SessionContext};
use crate::domain::{Entity, EntityState, Progression, SyncEvent, TransitionError, classify};
use crate::ports::{BrokerChannel, Message};

/// What to do with a transition that moves an entity backwards in rank.
///
/// Duplicates (same state again) are always accepted: redelivered batches
/// produce them by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankPolicy {
    /// Log and apply anyway.
    #[default]
    Warn,
    /// Refuse with `TransitionError`; the entity keeps its state.
    Reject,
}

/// Set `entity`'s state and emit a sync event to the controller.
///
/// The sync publish is best effort: if it fails the event is lost, but the
/// in-memory state has still advanced. Callers must not assume the controller
/// saw every transition.
pub async fn transition<E>(
    entity: &mut E,
    new_state: E::State,
    channel: &mut dyn BrokerChannel,
    ctx: &SessionContext,
) -> Result<Progression, TransitionError>
where
    E: Entity + Send,
{
    let current = entity.state();
    let progression = classify(current, new_state);

    if progression == Progression::Backward {
        match ctx.config().rank_policy {
            RankPolicy::Warn => warn!(
                entity = %E::KIND,
                uid = %entity.uid(),
                from = current.as_str(),
                to = new_state.as_str(),
                "backward transition applied"
            ),
            RankPolicy::Reject => {
                return Err(TransitionError {
                    entity: E::KIND.as_str(),
                    uid: entity.uid(),
                    from: current.as_str(),
                    to: new_state.as_str(),
                });
            }
        }
    }

    entity.set_state(new_state);

    let event = SyncEvent::for_entity(entity, ctx.clock().now());
    let queue = ctx.queue(QueuePurpose::Sync);
    match Message::json(&event) {
        Ok(message) => {
            if let Err(err) = channel.publish(&queue, message).await {
                warn!(uid = %event.uid, state = %event.state, error = %err, "sync event lost");
            }
        }
        Err(err) => warn!(uid = %event.uid, error = %err, "failed to encode sync event"),
    }

    debug!(entity = %E::KIND, uid = %event.uid, state = %event.state, "transitioned");
    Ok(progression)
}
