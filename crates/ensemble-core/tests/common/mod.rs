#![allow(dead_code)]

use std::sync::Once;

use ensemble_core::app::SessionContext;
use ensemble_core::config::EngineConfig;
use ensemble_core::domain::{ExecutionDescriptor, Task, hello_kernel};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs go through `with_test_writer()`, so they only show up for failing
/// tests (or with `-- --nocapture`). Levels come from `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

pub fn session() -> SessionContext {
    SessionContext::new(EngineConfig::default())
}

/// `n` hello-kernel tasks belonging to `pipeline/stage`.
pub fn hello_tasks(n: usize, stage: &str, pipeline: &str) -> Vec<Task> {
    (0..n)
        .map(|i| {
            let execution = hello_kernel()
                .bind("local.localhost", &[format!("--file=output-{i}.txt")])
                .map(|bound| bound.into_execution(1))
                .unwrap_or_else(|_| ExecutionDescriptor::default());
            Task::new(format!("task-{i}"), stage, pipeline, execution)
        })
        .collect()
}
