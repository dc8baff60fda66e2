#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod tracker;
pub mod watcher;

pub use config::IngestConfig;
pub use error::IngestError;
pub use pipeline::{IngestPipeline, IngestPipelineBuilder, IngestSnapshot, IngestStatsHandle};
pub use processor::{PipelineProcessor, ProcessorStats};
pub use queue::{IngestQueue, QueueItem, QueueStats};
pub use tracker::SourceTracker;
pub use watcher::FileWatcher;
