use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub use sidequest_progress::SampleAnchor;
use sidequest_progress::StepSample;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBatch {
    pub samples: Vec<StepSample>,
    /// `None` when the source did not issue a new cursor; the old one is kept.
    pub anchor: Option<SampleAnchor>,
}

/// The platform told us new step data exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub observed_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn now() -> Self {
        Self {
            observed_at: Utc::now(),
        }
    }
}

/// Platform health-data API, already authorised for step reads.
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    /// Steps recorded since local midnight.
    async fn query_today_cumulative_count(&self) -> Result<i64>;

    /// Fires whenever the platform records new steps.  Registration for
    /// background delivery happens outside this crate.
    fn subscribe_to_changes(&self) -> BoxStream<'static, ChangeNotification>;

    /// Samples added since `since` (everything, when `None`).
    async fn fetch_incremental_samples(&self, since: Option<&SampleAnchor>) -> Result<SampleBatch>;
}
