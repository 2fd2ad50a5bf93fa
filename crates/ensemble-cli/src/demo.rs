//! Controller side of a demo session: build one pipeline with one stage of
//! hello-kernel tasks, push the batch through the dispatch core, and fold the
//! results back into the stage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ensemble_core::app::{JournalEntry, LifecycleManager, QueuePurpose, SessionContext};
use ensemble_core::config::EngineConfig;
use ensemble_core::domain::{
    Pipeline, PipelineState, Stage, StageState, Task, TaskState, hello_kernel,
};
use ensemble_core::impls::{DummyRuntime, InMemoryBroker};
use ensemble_core::ports::{BrokerChannel, Connector, Message};
use tracing::{debug, info, warn};

const DEFAULT_RESOURCE: &str = "local.localhost";
const PIPELINE_NAME: &str = "pipeline-0";
const STAGE_NAME: &str = "stage-0";

#[derive(Debug)]
pub struct Summary {
    pub session: String,
    pub resource: String,
    pub tasks: Vec<Task>,
    pub stage_state: StageState,
    pub pipeline_state: PipelineState,
    pub sync_events: usize,
    pub worker_alive: bool,
    pub journal: Vec<JournalEntry>,
}

pub async fn run(config: EngineConfig, task_count: usize, wait: Duration) -> Result<Summary> {
    run_session(SessionContext::new(config), task_count, wait).await
}

/// Same as [`run`] on a caller-built session; task uids come from the
/// session's id generator.
pub async fn run_session(
    ctx: SessionContext,
    task_count: usize,
    wait: Duration,
) -> Result<Summary> {
    let resource = ctx
        .config()
        .resource
        .as_ref()
        .map_or_else(|| DEFAULT_RESOURCE.to_string(), |r| r.resource.clone());
    info!(session = %ctx.id(), %resource, tasks = task_count, "session created");

    let broker = InMemoryBroker::new();
    let mut controller = broker.connect().await?;
    // the controller is the only producer into `pending`
    controller.reset(&ctx.queue(QueuePurpose::Pending)).await?;

    let mut stage = Stage::new(STAGE_NAME, PIPELINE_NAME);
    let kernel = hello_kernel();
    for i in 0..task_count {
        let bound = kernel.bind(&resource, &[format!("--file=output-{i}.txt")])?;
        let task = Task::with_uid(
            ctx.ids().generate_task_id(),
            format!("task-{i}"),
            STAGE_NAME,
            PIPELINE_NAME,
            bound.into_execution(1),
        );
        stage.add_task(task)?;
    }

    let mut lm = LifecycleManager::new(
        ctx.clone(),
        Arc::new(broker.clone()),
        Arc::new(DummyRuntime::new()),
    );
    lm.start_heartbeat();
    lm.start_dispatch();

    let mut batch = stage.tasks().to_vec();
    for task in &mut batch {
        task.state = TaskState::Scheduled;
    }
    controller
        .publish(&ctx.queue(QueuePurpose::Pending), Message::json(&batch)?)
        .await?;
    stage.state = StageState::Scheduled;

    tokio::time::timeout(wait, collect_completed(controller.as_mut(), &ctx, &mut stage, task_count))
        .await
        .with_context(|| format!("batch did not come back within {wait:?}"))??;

    let sync_events = drain_sync(controller.as_mut(), &ctx).await?;
    let worker_alive = lm.check_dispatch() && lm.check_heartbeat();
    if !worker_alive {
        warn!(session = %ctx.id(), "dispatch worker reported dead before shutdown");
    }

    lm.terminate_dispatch().await?;
    lm.terminate_heartbeat().await?;
    controller.close().await?;

    let mut pipeline = Pipeline::new(PIPELINE_NAME);
    pipeline.add_stage(stage)?;
    pipeline.refresh_state();

    let stage_state = pipeline.stages().first().map_or(StageState::Described, |s| s.state);
    let tasks = pipeline
        .stages()
        .first()
        .map(|s| s.tasks().to_vec())
        .unwrap_or_default();

    Ok(Summary {
        session: ctx.id().to_string(),
        resource,
        tasks,
        stage_state,
        pipeline_state: pipeline.state,
        sync_events,
        worker_alive,
        journal: ctx.journal(),
    })
}

/// Poll `completed` until `expected` tasks have come back.
async fn collect_completed(
    channel: &mut dyn BrokerChannel,
    ctx: &SessionContext,
    stage: &mut Stage,
    expected: usize,
) -> Result<()> {
    let queue = ctx.queue(QueuePurpose::Completed);
    let mut received = 0;

    while received < expected {
        let Some(delivery) = channel.poll(&queue).await? else {
            tokio::time::sleep(ctx.config().idle_poll).await;
            continue;
        };

        let mut task: Task = delivery.message.decode()?;
        channel.ack(delivery.tag).await?;

        if task.state == TaskState::Executed {
            task.state = TaskState::Done;
        }
        debug!(task = %task.uid(), state = %task.state, "task came back");
        if stage.update_task(task) {
            received += 1;
        }
    }
    Ok(())
}

async fn drain_sync(channel: &mut dyn BrokerChannel, ctx: &SessionContext) -> Result<usize> {
    let queue = ctx.queue(QueuePurpose::Sync);
    let mut count = 0;
    while let Some(delivery) = channel.poll(&queue).await? {
        channel.ack(delivery.tag).await?;
        count += 1;
    }
    Ok(count)
}
