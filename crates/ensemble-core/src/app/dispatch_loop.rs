//! DispatchWorker - the worker side of a session.
//!
//! # Iteration
//! 1. poll `pending` (non-blocking); a message is a JSON array of tasks
//! 2. SUBMITTING pass over the whole batch, then a SUBMITTED pass
//! 3. ack the batch (the redelivery boundary)
//! 4. hand the tasks to the resource runtime
//! 5. EXECUTED + publish each task to `completed`
//! 6. answer at most one heartbeat probe, whether or not 1-5 found work
//!
//! Batch work and heartbeat work are settled independently: a recoverable
//! error in one is logged and does not stop the other. Only fatal errors
//! (the broker is gone) end the loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::heartbeat::respond_to_heartbeat;
use super::session::{QueuePurpose, SessionContext};
use super::transition::transition;
use crate::domain::{EngineError, Task, TaskState};
use crate::ports::{BrokerChannel, Connector, Message, ResourceRuntime};

/// Result of one concern within one iteration.
#[derive(Debug)]
pub enum StepOutcome {
    /// Nothing to do.
    Idle,
    /// Work done; the count is tasks for the batch step, probes for the
    /// heartbeat step.
    Completed(usize),
    /// Failed, logged, and the loop carries on.
    Recovered(EngineError),
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, StepOutcome::Idle)
    }
}

#[derive(Debug)]
pub struct IterationReport {
    pub batch: StepOutcome,
    pub heartbeat: StepOutcome,
}

impl IterationReport {
    pub fn is_idle(&self) -> bool {
        self.batch.is_idle() && self.heartbeat.is_idle()
    }
}

pub struct DispatchWorker {
    ctx: SessionContext,
    runtime: Arc<dyn ResourceRuntime>,
    channel: Box<dyn BrokerChannel>,
}

impl DispatchWorker {
    /// Open the worker's own channel and reset `heartbeat-res`, which only
    /// the worker produces into. Any failure here is fatal.
    pub async fn connect(
        ctx: SessionContext,
        connector: &dyn Connector,
        runtime: Arc<dyn ResourceRuntime>,
    ) -> Result<Self, EngineError> {
        let mut channel = connector.connect().await?;
        channel
            .reset(&ctx.queue(QueuePurpose::HeartbeatResponse))
            .await?;
        info!(session = %ctx.id(), "dispatch worker connected");
        Ok(Self {
            ctx,
            runtime,
            channel,
        })
    }

    pub async fn run_once(&mut self) -> Result<IterationReport, EngineError> {
        let batch = self.process_batch().await;
        let heartbeat = respond_to_heartbeat(self.channel.as_mut(), &self.ctx)
            .await
            .map(|answered| answered.then_some(1));

        Ok(IterationReport {
            batch: settle("batch", batch)?,
            heartbeat: settle("heartbeat", heartbeat)?,
        })
    }

    /// Iterate until `stop` flips to true (or its sender goes away), backing
    /// off for `idle_poll` when an iteration found nothing.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<(), EngineError> {
        let idle_poll = self.ctx.config().idle_poll;

        let result = loop {
            if *stop.borrow() {
                break Ok(());
            }

            match self.run_once().await {
                Ok(report) if report.is_idle() => {
                    tokio::select! {
                        _ = tokio::time::sleep(idle_poll) => {}
                        changed = stop.changed() => {
                            if changed.is_err() {
                                break Ok(());
                            }
                        }
                    }
                }
                Ok(_) => tokio::task::yield_now().await,
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = self.channel.close().await {
            debug!(error = %err, "dispatch channel close failed");
        }
        match &result {
            Ok(()) => info!(session = %self.ctx.id(), "dispatch worker stopped"),
            Err(err) => error!(session = %self.ctx.id(), error = %err, "dispatch worker terminated"),
        }
        result
    }

    async fn process_batch(&mut self) -> Result<Option<usize>, EngineError> {
        let pending = self.ctx.queue(QueuePurpose::Pending);
        let Some(delivery) = self.channel.poll(&pending).await? else {
            return Ok(None);
        };

        let mut tasks: Vec<Task> = delivery.message.decode()?;
        if delivery.redelivered {
            warn!(tag = %delivery.tag, tasks = tasks.len(), "reprocessing redelivered batch");
        }

        for task in &mut tasks {
            transition(task, TaskState::Submitting, self.channel.as_mut(), &self.ctx).await?;
        }
        for task in &mut tasks {
            transition(task, TaskState::Submitted, self.channel.as_mut(), &self.ctx).await?;
        }
        self.channel.ack(delivery.tag).await?;

        let count = tasks.len();
        let handoff = self.runtime.execute(tasks.clone());
        let result = match self.ctx.config().runtime_timeout {
            Some(limit) => tokio::time::timeout(limit, handoff)
                .await
                .unwrap_or_else(|_elapsed| {
                    Err(EngineError::RuntimeTimeout {
                        tasks: count,
                        timeout: limit,
                    })
                }),
            None => handoff.await,
        };

        match result {
            Ok(executed) => {
                let executed_count = executed.len();
                for mut task in executed {
                    transition(&mut task, TaskState::Executed, self.channel.as_mut(), &self.ctx)
                        .await?;
                    self.publish_completed(&task).await?;
                }
                debug!(tasks = executed_count, "batch executed");
                Ok(Some(executed_count))
            }
            Err(err) => {
                self.fail_batch(tasks).await?;
                Err(err)
            }
        }
    }

    /// Report tasks the runtime never finished so the controller hears about
    /// them on `completed` like any other result.
    async fn fail_batch(&mut self, tasks: Vec<Task>) -> Result<(), EngineError> {
        for mut task in tasks {
            transition(&mut task, TaskState::Failed, self.channel.as_mut(), &self.ctx).await?;
            self.publish_completed(&task).await?;
        }
        Ok(())
    }

    async fn publish_completed(&mut self, task: &Task) -> Result<(), EngineError> {
        let message = Message::json(task)?;
        self.channel
            .publish(&self.ctx.queue(QueuePurpose::Completed), message)
            .await?;
        Ok(())
    }
}

fn settle(
    step: &'static str,
    result: Result<Option<usize>, EngineError>,
) -> Result<StepOutcome, EngineError> {
    match result {
        Ok(None) => Ok(StepOutcome::Idle),
        Ok(Some(n)) => Ok(StepOutcome::Completed(n)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            error!(step, error = %err, "dispatch step failed; continuing");
            Ok(StepOutcome::Recovered(err))
        }
    }
}
