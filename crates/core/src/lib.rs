#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod plugin;
pub mod retry;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    AnalysisError, ConfigError, DeliveryError, LogwardenError, ParseError, PipelineError,
    PluginError, SourceError, StorageError,
};

// 설정
pub use config::LogwardenConfig;

// 이벤트
pub use event::{Event, EventMetadata, EventType, HubEvent, ResultEvent, StatusEvent};

// 파이프라인/협력자 trait
pub use pipeline::{Analyzer, HealthStatus, NotificationChannel, Parser, Persistence, Pipeline};

// 플러그인 시스템
pub use plugin::{DynPlugin, Plugin, PluginInfo, PluginRegistry, PluginState, PluginType};

// 재시도 정책
pub use retry::RetryPolicy;

// 도메인 타입
pub use types::{
    Analysis, EntryRef, LogEntry, LogSource, Priority, ProcessingResult, ResultStatus, Severity,
    SourceStatus, StructuredEvent,
};
