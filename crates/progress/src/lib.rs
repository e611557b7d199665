pub mod clock;
pub mod coordinator;
pub mod day_boundary;
pub mod error;
pub mod leveling;
pub mod reconciler;
pub mod schema;
pub mod store;
pub mod view;

pub use clock::{Clock, FixedClock, SystemClock};
pub use coordinator::{LiveState, Reading, StepSample, SyncCoordinator, SyncOutcome, TriggerKind};
pub use error::{StoreError, SyncError};
pub use schema::{
    DailyWatermark, LevelUpEvent, MAX_LEVEL, ProgressState, SampleAnchor, threshold_for,
};
pub use store::{
    JsonFileStore, MemoryStore, PersistenceStore, RedbStore, SNAPSHOT_VERSION, Snapshot, open_store,
};
pub use view::{ProgressView, Tier};
