use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Terminal level.  Once reached, steps keep accumulating but no threshold
/// applies any more.
pub const MAX_LEVEL: u32 = 25;

/// XP needed to advance out of `level`, or `None` at [`MAX_LEVEL`].
///
/// `100 + 50 * (level - 1)`: level 1 needs 100, level 2 needs 150, and so on
/// up to 1,250 for level 24.
pub fn threshold_for(level: u32) -> Option<u64> {
    if level >= MAX_LEVEL {
        return None;
    }
    let level = u64::from(level.max(1));
    Some(100 + 50 * (level - 1))
}

/// XP progress toward the next level.
///
/// Below [`MAX_LEVEL`] the invariant `steps < threshold_for(level)` holds
/// after every leveling pass.  At the max level `steps` is the uncapped
/// overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub steps: u64,
    pub level: u32,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self { steps: 0, level: 1 }
    }
}

impl ProgressState {
    pub fn is_maxed(&self) -> bool {
        self.level >= MAX_LEVEL
    }

    /// Clamp a loaded record back into `[1, MAX_LEVEL]`.  Returns `true` if
    /// anything changed.
    pub fn repair(&mut self) -> bool {
        let clamped = self.level.clamp(1, MAX_LEVEL);
        let changed = clamped != self.level;
        self.level = clamped;
        changed
    }
}

/// How much of today's external step counter has already been credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWatermark {
    pub last_absorbed_count: u64,
    pub as_of_date: NaiveDate,
}

impl DailyWatermark {
    /// A fresh watermark for `today` with nothing absorbed yet.
    pub fn starting(today: NaiveDate) -> Self {
        Self {
            last_absorbed_count: 0,
            as_of_date: today,
        }
    }
}

/// Opaque cursor returned by an incremental sample query.  Handing it back
/// yields only samples added since it was issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleAnchor(pub String);

impl SampleAnchor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

/// The level counter advanced to `new_level`.  One event per threshold
/// crossed, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelUpEvent {
    pub new_level: u32,
}
