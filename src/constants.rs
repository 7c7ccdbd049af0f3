use crate::types::{DdaMode, Difficulty};

pub const SKILL_MODES: [DdaMode; 2] = [DdaMode::Campaign, DdaMode::PracticeIa];
pub const SKILL_WINDOW_SIZE: usize = 12;
pub const RECENCY_ALPHA: f64 = 0.85;

pub const NEUTRAL_SKILL_MU: f64 = 0.5;
pub const NEUTRAL_SKILL_SIGMA: f64 = 0.5;
pub const PRIOR_SKILL_SIGMA: f64 = 0.45;

pub const POINTS_START: f64 = 1000.0;
pub const DDA_STAR_THRESHOLDS: [i32; 3] = [800, 400, 1];
pub const LEVEL_STAR_THRESHOLDS: [i32; 3] = [60, 45, 30];

pub const MAZE_RATING_CONFIG_ID: &str = "maze_rating";
pub const MAZE_CONFIG_TTL_MS: u64 = 60_000;

pub const CAMPAIGN_LEVELS_PER_DIFFICULTY: u32 = 15;
pub const MAX_MAZE_SIDE: i32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CampaignLevelSpec {
    pub width: i32,
    pub height: i32,
    pub memorize_time: u32,
}

pub fn get_campaign_level_spec(_difficulty: Difficulty, _level_number: u32) -> CampaignLevelSpec {
    CampaignLevelSpec {
        width: 7,
        height: 7,
        memorize_time: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_campaign_and_practice_ia_feed_the_estimator() {
        assert!(SKILL_MODES.contains(&DdaMode::Campaign));
        assert!(SKILL_MODES.contains(&DdaMode::PracticeIa));
        assert!(!SKILL_MODES.contains(&DdaMode::PracticeFree));
        assert!(!SKILL_MODES.contains(&DdaMode::PracticeNormal));
        assert!(!SKILL_MODES.contains(&DdaMode::Other));
    }

    #[test]
    fn campaign_levels_use_the_standard_board() {
        let spec = get_campaign_level_spec(Difficulty::Hard, 15);
        assert_eq!((spec.width, spec.height, spec.memorize_time), (7, 7, 10));
    }
}
