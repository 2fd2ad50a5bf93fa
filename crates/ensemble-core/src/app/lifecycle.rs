//! LifecycleManager - owns one dispatch worker and one heartbeat monitor per
//! session.
//!
//! Both units are tokio tasks with their own broker channel; the only state
//! shared with them is a stop signal (`watch`) and, for the monitor, a
//! finished flag. Dropping the manager drops the stop senders, which the
//! units treat as a stop request.
//!
//! Termination joins without a timeout. A worker wedged inside the resource
//! runtime with `runtime_timeout_ms = 0` makes `terminate_dispatch` hang.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::dispatch_loop::DispatchWorker;
use super::heartbeat::{HeartbeatExit, HeartbeatMonitor};
use super::session::SessionContext;
use crate::domain::EngineError;
use crate::ports::{Connector, ResourceRuntime};

struct Unit<T> {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<Result<T, EngineError>>,
}

impl<T> Unit<T> {
    fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Signal stop, then wait for the unit however long it takes.
    async fn stop_and_join(self, unit: &'static str) -> Result<Result<T, EngineError>, EngineError> {
        // 送信エラーは無視: unit は既に終了しているかもしれない
        let _ = self.stop_tx.send(true);
        self.join.await.map_err(|err| EngineError::Join {
            unit,
            reason: err.to_string(),
        })
    }
}

pub struct LifecycleManager {
    ctx: SessionContext,
    connector: Arc<dyn Connector>,
    runtime: Arc<dyn ResourceRuntime>,
    dispatch: Option<Unit<()>>,
    heartbeat: Option<(Unit<HeartbeatExit>, Arc<AtomicBool>)>,
}

impl LifecycleManager {
    pub fn new(
        ctx: SessionContext,
        connector: Arc<dyn Connector>,
        runtime: Arc<dyn ResourceRuntime>,
    ) -> Self {
        Self {
            ctx,
            connector,
            runtime,
            dispatch: None,
            heartbeat: None,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    /// Spawn the dispatch worker unless one is already running.
    /// Returns whether a worker was spawned. Must be called inside a tokio
    /// runtime.
    pub fn start_dispatch(&mut self) -> bool {
        if self.dispatch.as_ref().is_some_and(Unit::is_running) {
            warn!(session = %self.ctx.id(), "dispatch worker already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        let connector = Arc::clone(&self.connector);
        let runtime = Arc::clone(&self.runtime);

        let join = tokio::spawn(async move {
            let worker = DispatchWorker::connect(ctx, connector.as_ref(), runtime).await?;
            worker.run(stop_rx).await
        });

        self.dispatch = Some(Unit { stop_tx, join });
        self.ctx.record("dispatch started");
        info!(session = %self.ctx.id(), "dispatch worker spawned");
        true
    }

    /// Spawn the heartbeat monitor unless one is already running.
    pub fn start_heartbeat(&mut self) -> bool {
        if self
            .heartbeat
            .as_ref()
            .is_some_and(|(_, finished)| !finished.load(Ordering::SeqCst))
        {
            warn!(session = %self.ctx.id(), "heartbeat monitor already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = HeartbeatMonitor::new(self.ctx.clone(), Arc::clone(&self.connector));
        let finished = monitor.finished_flag();
        let join = tokio::spawn(monitor.run(stop_rx));

        self.heartbeat = Some((Unit { stop_tx, join }, finished));
        self.ctx.record("heartbeat started");
        info!(session = %self.ctx.id(), "heartbeat monitor spawned");
        true
    }

    /// Whether the dispatch worker is still running.
    pub fn check_dispatch(&self) -> bool {
        self.dispatch.as_ref().is_some_and(Unit::is_running)
    }

    /// Whether the heartbeat monitor still believes the worker is alive.
    pub fn check_heartbeat(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|(_, finished)| !finished.load(Ordering::SeqCst))
    }

    /// Stop and join the dispatch worker. `Ok(false)` if none was started.
    ///
    /// An error the worker died with earlier is logged, not returned; only a
    /// panicked or aborted worker is an `Err` here.
    pub async fn terminate_dispatch(&mut self) -> Result<bool, EngineError> {
        let Some(unit) = self.dispatch.take() else {
            return Ok(false);
        };

        if let Err(err) = unit.stop_and_join("dispatch worker").await? {
            warn!(session = %self.ctx.id(), error = %err, "dispatch worker had failed");
        }
        self.ctx.record("dispatch terminated");
        info!(session = %self.ctx.id(), "dispatch worker terminated");
        Ok(true)
    }

    /// Stop and join the heartbeat monitor, then seal the session journal.
    /// Meant to run after `terminate_dispatch`.
    pub async fn terminate_heartbeat(&mut self) -> Result<bool, EngineError> {
        let Some((unit, _finished)) = self.heartbeat.take() else {
            return Ok(false);
        };

        match unit.stop_and_join("heartbeat monitor").await? {
            Ok(exit) => info!(session = %self.ctx.id(), ?exit, "heartbeat monitor terminated"),
            Err(err) => warn!(session = %self.ctx.id(), error = %err, "heartbeat monitor had failed"),
        }
        self.ctx.record("heartbeat terminated");
        self.ctx.seal_journal();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::EngineConfig;
    use crate::domain::BrokerError;
    use crate::impls::{DummyRuntime, InMemoryBroker};
    use crate::ports::BrokerChannel;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
            Err(BrokerError::Unreachable("connection refused".to_string()))
        }
    }

    fn manager(connector: Arc<dyn Connector>) -> LifecycleManager {
        LifecycleManager::new(
            SessionContext::new(EngineConfig::default()),
            connector,
            Arc::new(DummyRuntime::new()),
        )
    }

    #[tokio::test]
    async fn terminate_without_start_is_a_noop() {
        let mut lm = manager(Arc::new(InMemoryBroker::new()));

        assert!(!lm.terminate_dispatch().await.unwrap());
        assert!(!lm.terminate_heartbeat().await.unwrap());
        assert!(!lm.check_dispatch());
        assert!(!lm.check_heartbeat());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let mut lm = manager(Arc::new(InMemoryBroker::new()));

        assert!(lm.start_dispatch());
        assert!(!lm.start_dispatch());
        assert!(lm.start_heartbeat());
        assert!(!lm.start_heartbeat());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(lm.check_dispatch());
        assert!(lm.check_heartbeat());

        assert!(lm.terminate_dispatch().await.unwrap());
        assert!(!lm.check_dispatch());
        assert!(lm.terminate_heartbeat().await.unwrap());

        let events: Vec<String> = lm.session().journal().into_iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                "dispatch started",
                "heartbeat started",
                "dispatch terminated",
                "heartbeat terminated"
            ]
        );
        assert!(lm.session().journal_sealed());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stays_alive_while_dispatch_runs() {
        let mut lm = manager(Arc::new(InMemoryBroker::new()));
        lm.start_dispatch();
        lm.start_heartbeat();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(lm.check_heartbeat());

        lm.terminate_dispatch().await.unwrap();
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(!lm.check_heartbeat());

        assert!(lm.terminate_heartbeat().await.unwrap());
    }

    #[tokio::test]
    async fn refused_connection_kills_the_worker() {
        let mut lm = manager(Arc::new(RefusingConnector));
        lm.start_dispatch();

        while lm.check_dispatch() {
            tokio::task::yield_now().await;
        }

        assert!(lm.terminate_dispatch().await.unwrap());
        // a dead worker can be started again
        assert!(lm.start_dispatch());
        lm.terminate_dispatch().await.unwrap();
    }
}
