//! Heartbeat - liveness proof between the controller and the dispatch worker.
//!
//! The monitor runs on the controller side with its own broker channel. Each
//! cycle it publishes a probe to `heartbeat-req`, waits one interval, then
//! polls `heartbeat-res` exactly once. A missing or mismatched answer ends the
//! monitor: there is no retry budget, deciding what to do about a dead worker
//! is the controller's job. The monitor is the only consumer of
//! `heartbeat-res`; whatever it finds there at startup is discarded.
//!
//! The responder is the worker half and is driven from the dispatch loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::session::{QueuePurpose, SessionContext};
use crate::domain::EngineError;
use crate::ports::{BrokerChannel, Connector, Message};

pub const HEARTBEAT_REQUEST: &str = "request";
pub const HEARTBEAT_RESPONSE: &str = "response";

/// Why the monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The stop signal was observed.
    Stopped,
    /// Nothing on `heartbeat-res` after the wait interval.
    Unresponsive { correlation_id: String },
    /// An answer arrived, but not to the most recent probe.
    Mismatch {
        expected: String,
        received: Option<String>,
    },
}

impl HeartbeatExit {
    /// True when the worker is presumed dead.
    pub fn is_death(&self) -> bool {
        !matches!(self, HeartbeatExit::Stopped)
    }
}

pub struct HeartbeatMonitor {
    ctx: SessionContext,
    connector: Arc<dyn Connector>,
    finished: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(ctx: SessionContext, connector: Arc<dyn Connector>) -> Self {
        Self {
            ctx,
            connector,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once `run` returns, whatever the reason.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<HeartbeatExit, EngineError> {
        let result = self.monitor(&mut stop).await;
        self.finished.store(true, Ordering::SeqCst);

        match &result {
            Ok(HeartbeatExit::Stopped) => info!(session = %self.ctx.id(), "heartbeat monitor stopped"),
            Ok(exit) => warn!(session = %self.ctx.id(), ?exit, "dispatch worker presumed dead"),
            Err(err) => warn!(session = %self.ctx.id(), error = %err, "heartbeat monitor failed"),
        }
        result
    }

    async fn monitor(&self, stop: &mut watch::Receiver<bool>) -> Result<HeartbeatExit, EngineError> {
        let mut channel = self.connector.connect().await?;
        let result = self.probe_loop(channel.as_mut(), stop).await;
        if let Err(err) = channel.close().await {
            debug!(error = %err, "heartbeat channel close failed");
        }
        result
    }

    async fn probe_loop(
        &self,
        channel: &mut dyn BrokerChannel,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<HeartbeatExit, EngineError> {
        let request_queue = self.ctx.queue(QueuePurpose::HeartbeatRequest);
        let response_queue = self.ctx.queue(QueuePurpose::HeartbeatResponse);
        let interval = self.ctx.config().heartbeat_interval;

        channel.reset(&request_queue).await?;

        // 前回の monitor が残した応答は、これから出す要求とは一致しない
        let mut discarded = 0usize;
        while let Some(stale) = channel.poll(&response_queue).await? {
            channel.ack(stale.tag).await?;
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "dropped answers left by an earlier monitor");
        }

        loop {
            if *stop.borrow() {
                return Ok(HeartbeatExit::Stopped);
            }

            let correlation_id = self.ctx.ids().generate_correlation_id();
            let probe = Message::new(HEARTBEAT_REQUEST)
                .with_correlation_id(correlation_id.clone())
                .with_reply_to(response_queue.clone());
            channel.publish(&request_queue, probe).await?;
            debug!(%correlation_id, "heartbeat probe sent");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                // a dropped sender counts as a stop request too
                _ = stop.changed() => return Ok(HeartbeatExit::Stopped),
            }

            let Some(answer) = channel.poll(&response_queue).await? else {
                return Ok(HeartbeatExit::Unresponsive { correlation_id });
            };

            if answer.message.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                // never matches a later request; consumed so a restarted monitor
                // does not see it again
                channel.ack(answer.tag).await?;
                return Ok(HeartbeatExit::Mismatch {
                    expected: correlation_id,
                    received: answer.message.correlation_id,
                });
            }

            channel.ack(answer.tag).await?;
            debug!(%correlation_id, "heartbeat answered");
        }
    }
}

/// Answer at most one pending probe. Returns whether one was answered.
///
/// The reply goes to the probe's `reply_to`, falling back to the session's
/// `heartbeat-res` queue, and carries the probe's correlation id unchanged.
pub async fn respond_to_heartbeat(
    channel: &mut dyn BrokerChannel,
    ctx: &SessionContext,
) -> Result<bool, EngineError> {
    let Some(probe) = channel.poll(&ctx.queue(QueuePurpose::HeartbeatRequest)).await? else {
        return Ok(false);
    };

    let reply_to = probe
        .message
        .reply_to
        .clone()
        .unwrap_or_else(|| ctx.queue(QueuePurpose::HeartbeatResponse));

    let mut response = Message::new(HEARTBEAT_RESPONSE);
    if let Some(correlation_id) = &probe.message.correlation_id {
        response = response.with_correlation_id(correlation_id.clone());
    }

    channel.publish(&reply_to, response).await?;
    channel.ack(probe.tag).await?;
    debug!(correlation_id = ?probe.message.correlation_id, "heartbeat probe answered");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::domain::BrokerError;
    use crate::impls::InMemoryBroker;
    use tokio::time::Instant;

    fn ctx() -> SessionContext {
        SessionContext::new(EngineConfig::default())
    }

    fn spawn_monitor(
        ctx: &SessionContext,
        broker: &InMemoryBroker,
    ) -> (
        watch::Sender<bool>,
        Arc<AtomicBool>,
        tokio::task::JoinHandle<Result<HeartbeatExit, EngineError>>,
    ) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = HeartbeatMonitor::new(ctx.clone(), Arc::new(broker.clone()));
        let finished = monitor.finished_flag();
        let handle = tokio::spawn(monitor.run(stop_rx));
        (stop_tx, finished, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn answered_probes_keep_the_monitor_running() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let (stop_tx, finished, handle) = spawn_monitor(&ctx, &broker);

        let responder_ctx = ctx.clone();
        let mut responder = broker.connect().await.unwrap();
        let responder_task = tokio::spawn(async move {
            loop {
                respond_to_heartbeat(responder.as_mut(), &responder_ctx)
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert!(!handle.is_finished());

        stop_tx.send(true).unwrap();
        let exit = handle.await.unwrap().unwrap();
        assert_eq!(exit, HeartbeatExit::Stopped);
        assert!(finished.load(Ordering::SeqCst));
        assert!(broker.acked_count(&ctx.queue(QueuePurpose::HeartbeatResponse)) >= 3);

        responder_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_answer_ends_monitor_after_one_interval() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let started = Instant::now();
        let (_stop_tx, finished, handle) = spawn_monitor(&ctx, &broker);

        let exit = handle.await.unwrap().unwrap();

        assert!(matches!(exit, HeartbeatExit::Unresponsive { .. }));
        assert!(exit.is_death());
        assert!(finished.load(Ordering::SeqCst));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    fn spawn_responder(
        ctx: &SessionContext,
        mut channel: Box<dyn BrokerChannel>,
    ) -> tokio::task::JoinHandle<()> {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                respond_to_heartbeat(channel.as_mut(), &ctx).await.unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_monitor_ignores_answers_from_earlier_runs() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let response_queue = ctx.queue(QueuePurpose::HeartbeatResponse);
        let mut late = broker.connect().await.unwrap();
        late.publish(
            &response_queue,
            Message::new(HEARTBEAT_RESPONSE).with_correlation_id("late"),
        )
        .await
        .unwrap();

        let responder = spawn_responder(&ctx, broker.connect().await.unwrap());

        for round in 0..3 {
            let (stop_tx, finished, handle) = spawn_monitor(&ctx, &broker);
            tokio::time::sleep(Duration::from_secs(25)).await;
            assert!(!finished.load(Ordering::SeqCst), "round {round}");

            stop_tx.send(true).unwrap();
            assert_eq!(handle.await.unwrap().unwrap(), HeartbeatExit::Stopped);
            // at most the answer to the request in flight when stopped
            assert!(broker.queue_len(&response_queue) <= 1, "round {round}");
        }

        responder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_answer_ends_the_monitor_and_is_consumed() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let request_queue = ctx.queue(QueuePurpose::HeartbeatRequest);
        let response_queue = ctx.queue(QueuePurpose::HeartbeatResponse);

        let mut impostor = broker.connect().await.unwrap();
        let (req, res) = (request_queue.clone(), response_queue.clone());
        let impostor_task = tokio::spawn(async move {
            loop {
                if let Some(request) = impostor.poll(&req).await.unwrap() {
                    impostor
                        .publish(
                            &res,
                            Message::new(HEARTBEAT_RESPONSE).with_correlation_id("someone-else"),
                        )
                        .await
                        .unwrap();
                    impostor.ack(request.tag).await.unwrap();
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let (_stop_tx, _finished, handle) = spawn_monitor(&ctx, &broker);
        let exit = handle.await.unwrap().unwrap();

        match exit {
            HeartbeatExit::Mismatch { received, .. } => {
                assert_eq!(received.as_deref(), Some("someone-else"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(broker.queue_len(&response_queue), 0);
        assert_eq!(broker.acked_count(&response_queue), 1);

        impostor_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_interrupts_the_wait() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let started = Instant::now();
        let (stop_tx, finished, handle) = spawn_monitor(&ctx, &broker);

        tokio::time::sleep(Duration::from_secs(2)).await;
        stop_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), HeartbeatExit::Stopped);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_and_still_sets_finished() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let (_stop_tx, finished, handle) = spawn_monitor(&ctx, &broker);

        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(
            err,
            EngineError::Broker(BrokerError::Unreachable(_))
        ));
        assert!(err.is_fatal());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn responder_echoes_correlation_id_and_acks_the_probe() {
        let ctx = ctx();
        let broker = InMemoryBroker::new();
        let mut ch = broker.connect().await.unwrap();
        let request_queue = ctx.queue(QueuePurpose::HeartbeatRequest);

        assert!(!respond_to_heartbeat(ch.as_mut(), &ctx).await.unwrap());

        ch.publish(
            &request_queue,
            Message::new(HEARTBEAT_REQUEST)
                .with_correlation_id("c-1")
                .with_reply_to("custom-replies"),
        )
        .await
        .unwrap();

        assert!(respond_to_heartbeat(ch.as_mut(), &ctx).await.unwrap());

        let answer = ch.poll("custom-replies").await.unwrap().unwrap();
        assert_eq!(answer.message.body, HEARTBEAT_RESPONSE.as_bytes());
        assert_eq!(answer.message.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(broker.acked_count(&request_queue), 1);
    }
}
