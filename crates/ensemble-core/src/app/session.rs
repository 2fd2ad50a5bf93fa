//! Explicit session context handed to every component at construction.
//!
//! Holds what would otherwise be process-wide state: the session id (which
//! scopes every queue name), the configuration, time and id sources, and the
//! lifecycle journal.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::domain::SessionId;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// The logically distinct queues of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePurpose {
    /// Controller -> worker task batches.
    Pending,
    /// Worker -> controller finished tasks.
    Completed,
    /// Monitor -> worker liveness probes.
    HeartbeatRequest,
    /// Worker -> monitor probe answers.
    HeartbeatResponse,
    /// Worker -> controller state-change events.
    Sync,
}

impl QueuePurpose {
    pub fn suffix(self) -> &'static str {
        match self {
            QueuePurpose::Pending => "pending",
            QueuePurpose::Completed => "completed",
            QueuePurpose::HeartbeatRequest => "heartbeat-req",
            QueuePurpose::HeartbeatResponse => "heartbeat-res",
            QueuePurpose::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub event: String,
    pub at: DateTime<Utc>,
}

/// Timestamped record of lifecycle events. Once sealed, writes are ignored.
#[derive(Debug, Default)]
struct Journal {
    entries: Vec<JournalEntry>,
    sealed: bool,
}

struct SessionInner {
    id: SessionId,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    journal: Mutex<Journal>,
}

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// New session with the system clock and ULID ids.
    pub fn new(config: EngineConfig) -> Self {
        let ids = Arc::new(UlidGenerator::new(SystemClock));
        let id = ids.generate_session_id();
        Self::with_parts(id, config, Arc::new(SystemClock), ids)
    }

    pub fn with_parts(
        id: SessionId,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                clock,
                ids,
                journal: Mutex::new(Journal::default()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.inner.ids.as_ref()
    }

    /// `{session-id}-{purpose}`
    pub fn queue(&self, purpose: QueuePurpose) -> String {
        format!("{}-{}", self.inner.id, purpose.suffix())
    }

    pub fn record(&self, event: impl Into<String>) {
        let mut journal = self
            .inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if journal.sealed {
            return;
        }
        let at = self.inner.clock.now();
        journal.entries.push(JournalEntry {
            event: event.into(),
            at,
        });
    }

    /// Close the journal; later `record` calls are dropped.
    pub fn seal_journal(&self) {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed = true;
    }

    pub fn journal_sealed(&self) -> bool {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_scoped_by_session() {
        let ctx = SessionContext::new(EngineConfig::default());
        let sid = ctx.id().to_string();

        assert_eq!(ctx.queue(QueuePurpose::Pending), format!("{sid}-pending"));
        assert_eq!(
            ctx.queue(QueuePurpose::HeartbeatRequest),
            format!("{sid}-heartbeat-req")
        );
        assert_eq!(
            ctx.queue(QueuePurpose::HeartbeatResponse),
            format!("{sid}-heartbeat-res")
        );

        let other = SessionContext::new(EngineConfig::default());
        assert_ne!(ctx.queue(QueuePurpose::Sync), other.queue(QueuePurpose::Sync));
    }

    #[test]
    fn sealed_journal_ignores_writes() {
        let ctx = SessionContext::new(EngineConfig::default());
        ctx.record("dispatch started");
        ctx.seal_journal();
        ctx.record("too late");

        let events: Vec<_> = ctx.journal().into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec!["dispatch started"]);
        assert!(ctx.journal_sealed());
    }
}
