//! Leveling state machine: turns credited XP into level-ups.

use tracing::info;

use crate::error::SyncError;
use crate::schema::{LevelUpEvent, MAX_LEVEL, ProgressState, threshold_for};

/// Add `delta` XP to `state` and promote while thresholds are met.
///
/// Returns one [`LevelUpEvent`] per level gained, in ascending order.  At
/// [`MAX_LEVEL`] the steps simply accumulate.
pub fn apply_delta(state: &mut ProgressState, delta: i64) -> Result<Vec<LevelUpEvent>, SyncError> {
    let delta = u64::try_from(delta).map_err(|_| SyncError::InvalidInput {
        what: "xp delta",
        value: delta,
    })?;
    Ok(credit(state, delta))
}

/// Infallible core of [`apply_delta`] for already-validated deltas.
pub(crate) fn credit(state: &mut ProgressState, delta: u64) -> Vec<LevelUpEvent> {
    state.steps = state.steps.saturating_add(delta);

    let mut events = Vec::new();
    while state.level < MAX_LEVEL {
        let Some(threshold) = threshold_for(state.level) else {
            break;
        };
        if state.steps < threshold {
            break;
        }
        state.steps -= threshold;
        state.level += 1;
        info!(level = state.level, carry = state.steps, "level up");
        events.push(LevelUpEvent {
            new_level: state.level,
        });
    }
    events
}
