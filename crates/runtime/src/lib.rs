pub mod notify;
mod queue;
mod service;
pub mod source;
pub mod telemetry;

pub use notify::{BroadcastSink, LevelUpNotification, NotificationSink, TracingSink};
pub use queue::{TriggerQueue, TriggerReceiver, trigger_queue};
pub use service::{ServiceHandle, ServiceOptions, SyncService};
pub use source::{ChangeNotification, HealthDataSource, SampleAnchor, SampleBatch};
