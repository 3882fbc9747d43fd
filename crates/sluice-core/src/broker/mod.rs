pub mod admin;
pub mod audit;
pub mod config;
pub mod maintenance;
pub mod metrics;
pub mod queue_service;
pub mod stats;

pub use admin::AdminService;
pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use config::{
    DeadLetterSettings, LogFormat, LoggingConfig, MaintenanceConfig, QueueSettings, SluiceConfig,
    StorageConfig,
};
pub use maintenance::Maintenance;
pub use metrics::Metrics;
pub use queue_service::{LeaseMessages, QueueService, SendMessage};
pub use stats::TopicStats;
