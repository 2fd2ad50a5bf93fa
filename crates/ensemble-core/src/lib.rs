//! ensemble-core
//!
//! Dispatch core of the Ensemble workflow engine.
//!
//! - **domain**: ranked states, tasks / stages / pipelines, sync events,
//!   kernel templates, resource descriptions, errors
//! - **ports**: traits at the seams (broker channel, resource runtime, clock,
//!   id generation)
//! - **impls**: in-process implementations (in-memory broker, dummy runtime)
//! - **app**: session context, transitions, dispatch worker, heartbeat,
//!   lifecycle manager
//! - **config**: TOML engine configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
