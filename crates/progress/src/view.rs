use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{MAX_LEVEL, ProgressState, threshold_for};

/// Cosmetic grouping of levels.
///
/// | Tier       | Levels  |
/// |------------|---------|
/// | `Bronze`   | 1 – 4   |
/// | `Silver`   | 5 – 9   |
/// | `Gold`     | 10 – 14 |
/// | `Platinum` | 15 – 19 |
/// | `Diamond`  | 20 – 24 |
/// | `Maxed`    | 25      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Maxed,
}

impl Tier {
    pub fn for_level(level: u32) -> Self {
        match level {
            0..=4 => Self::Bronze,
            5..=9 => Self::Silver,
            10..=14 => Self::Gold,
            15..=19 => Self::Platinum,
            20..=24 => Self::Diamond,
            _ => Self::Maxed,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Bronze => "Bronze",
            Self::Silver => "Silver",
            Self::Gold => "Gold",
            Self::Platinum => "Platinum",
            Self::Diamond => "Diamond",
            Self::Maxed => "MAXED",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Read-only display values derived from a [`ProgressState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub level: u32,
    pub steps: u64,
    /// XP required to leave the current level; `None` once maxed.
    pub threshold: Option<u64>,
    /// XP still missing before the next level-up (0 once maxed).
    pub xp_needed: u64,
    /// Bar fill in `[0.0, 1.0]`.
    pub progress_fraction: f64,
    pub tier: Tier,
}

impl ProgressView {
    pub fn from_state(state: &ProgressState) -> Self {
        let threshold = threshold_for(state.level);
        let (xp_needed, progress_fraction) = match threshold {
            Some(t) => (
                t.saturating_sub(state.steps),
                state.steps.min(t) as f64 / t as f64,
            ),
            None => (0, 1.0),
        };
        Self {
            level: state.level,
            steps: state.steps,
            threshold,
            xp_needed,
            progress_fraction,
            tier: Tier::for_level(state.level),
        }
    }

    /// Whole-number percentage for labels.
    pub fn percent(&self) -> u8 {
        (self.progress_fraction * 100.0).floor().clamp(0.0, 100.0) as u8
    }

    pub fn is_maxed(&self) -> bool {
        self.level >= MAX_LEVEL
    }

    /// `"LEVEL 07"`.
    pub fn level_label(&self) -> String {
        format!("LEVEL {:02}", self.level)
    }

    /// `"643 XP NEEDED"`.
    pub fn xp_label(&self) -> String {
        format!("{} XP NEEDED", self.xp_needed)
    }
}

impl From<&ProgressState> for ProgressView {
    fn from(state: &ProgressState) -> Self {
        Self::from_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        let cases = [
            (1, Tier::Bronze),
            (4, Tier::Bronze),
            (5, Tier::Silver),
            (9, Tier::Silver),
            (10, Tier::Gold),
            (15, Tier::Platinum),
            (19, Tier::Platinum),
            (20, Tier::Diamond),
            (24, Tier::Diamond),
            (25, Tier::Maxed),
        ];
        for (level, tier) in cases {
            assert_eq!(Tier::for_level(level), tier, "level {level}");
        }
        assert_eq!(Tier::Maxed.to_string(), "MAXED");
    }

    #[test]
    fn mid_level_view() {
        let view = ProgressView::from_state(&ProgressState { steps: 75, level: 2 });
        assert_eq!(view.threshold, Some(150));
        assert_eq!(view.xp_needed, 75);
        assert_eq!(view.percent(), 50);
        assert_eq!(view.level_label(), "LEVEL 02");
        assert_eq!(view.xp_label(), "75 XP NEEDED");
        assert_eq!(view.tier, Tier::Bronze);
    }

    #[test]
    fn maxed_view_is_full() {
        let view = ProgressView::from_state(&ProgressState {
            steps: 9_999,
            level: MAX_LEVEL,
        });
        assert!(view.is_maxed());
        assert_eq!(view.threshold, None);
        assert_eq!(view.xp_needed, 0);
        assert_eq!(view.percent(), 100);
        assert_eq!(view.tier, Tier::Maxed);
    }
}
