#![doc = include_str!("../README.md")]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod record;
pub mod rule;
pub mod throttle;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatcherHandle, NotificationDispatcher, NotificationDispatcherBuilder};
pub use error::NotifyError;
pub use record::{DeliveryStatus, NotificationRecord};
pub use rule::{NotificationRule, load_rules_from_dir};
pub use throttle::Throttle;
