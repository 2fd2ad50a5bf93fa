mod cli;
mod demo;
mod logging;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use ensemble_core::config::{EngineConfig, default_config_path};
use serde_json::json;

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("ensemble error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> Result<()> {
    let args = cli::parse();
    let config = load_config(args.config.as_deref())?;
    logging::init_logging(args.log_level, config.log_level.as_deref())?;

    if args.check_config {
        println!("{config:#?}");
        return Ok(());
    }

    let summary = demo::run(config, args.tasks, Duration::from_secs(args.wait)).await?;

    if args.json {
        let tasks: Vec<_> = summary
            .tasks
            .iter()
            .map(|t| {
                json!({
                    "uid": t.uid().to_string(),
                    "name": t.name,
                    "state": t.state.to_string(),
                    "path": t.path,
                })
            })
            .collect();
        let journal: Vec<_> = summary
            .journal
            .iter()
            .map(|e| json!({ "event": e.event, "at": e.at.to_rfc3339() }))
            .collect();
        let out = json!({
            "session": summary.session,
            "resource": summary.resource,
            "stage_state": summary.stage_state.to_string(),
            "pipeline_state": summary.pipeline_state.to_string(),
            "sync_events": summary.sync_events,
            "worker_alive": summary.worker_alive,
            "tasks": tasks,
            "journal": journal,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("session   {}", summary.session);
    println!("resource  {}", summary.resource);
    for task in &summary.tasks {
        println!(
            "  {:<10} {:<10} {}",
            task.name,
            task.state,
            task.path.as_deref().unwrap_or("-")
        );
    }
    println!("stage     {}", summary.stage_state);
    println!("pipeline  {}", summary.pipeline_state);
    println!("sync      {} event(s)", summary.sync_events);
    for entry in &summary.journal {
        println!("  {}  {}", entry.at.to_rfc3339(), entry.event);
    }
    Ok(())
}

/// An explicit `--config` must load; the default path is optional.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load_from_path(path)?),
        None => {
            let default = default_config_path();
            if default.exists() {
                Ok(EngineConfig::load_from_path(&default)?)
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}
