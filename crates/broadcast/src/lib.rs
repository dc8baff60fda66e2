#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod subscription;

pub use client::{ClientHandle, ClientState};
pub use config::HubConfig;
pub use error::BroadcastError;
pub use hub::{BroadcastHub, BroadcastHubBuilder, HubConnector, HubStatsHandle};
pub use message::{ClientRequest, FilterSpec, Frame, FrameKind};
pub use subscription::{EventFilter, Subscription};
