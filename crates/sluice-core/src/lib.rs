pub mod broker;
pub mod clock;
pub mod error;
pub mod message;
pub mod partition;
pub mod storage;
pub mod telemetry;

pub use broker::{
    AdminService, AuditEvent, AuditSink, LeaseMessages, Maintenance, QueueService, SendMessage,
    SluiceConfig, TopicStats,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    AdminError, ConfigError, EnqueueError, LeaseError, MaintenanceError, StorageError,
    StorageResult,
};
pub use message::{new_owner_id, DeadLetter, Message, MessageStatus, NewMessage};
pub use partition::partition;
pub use storage::{MessageStore, ReclaimPolicy, RocksDbStorage, SoftDeleteDlqSupport, StatusCounts};
