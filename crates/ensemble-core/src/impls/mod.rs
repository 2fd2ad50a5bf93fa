//! Impls - in-process implementations of the ports, used by the CLI demo and
//! by tests.

pub mod dummy_runtime;
pub mod inmem_broker;

pub use self::dummy_runtime::DummyRuntime;
pub use self::inmem_broker::{InMemoryBroker, InMemoryChannel};
