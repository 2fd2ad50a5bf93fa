//! Ports - traits at the seams to external collaborators (broker, resource
//! runtime, time, id generation).

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod resource_runtime;

pub use self::broker::{BrokerChannel, Connector, Delivery, DeliveryTag, Message};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::resource_runtime::ResourceRuntime;
