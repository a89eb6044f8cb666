//! Pub/sub plumbing for the Umbra shadow manager.
//!
//! Two message planes share the abstractions here:
//! - `Channel` for the cloud MQTT session (rumqttc, mockable in tests)
//! - `PubSub` for the local broker, with an in-process `LocalBus`
//!   implementation used by the service and the test harness

pub mod channel;
pub mod config;
pub mod error;
pub mod local;
pub mod mock;
pub mod tls;

pub use channel::{Channel, MqttChannel};
pub use config::MqttConfig;
pub use error::{MqttError, MqttResult};
pub use local::{BusMessage, LocalBus, PubSub};
pub use mock::MockChannel;
