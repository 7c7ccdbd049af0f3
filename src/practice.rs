//! Fixed progression for the non-adaptive practice run: boards grow with the
//! level index and the point economy steps up every three levels.

use serde::Serialize;

use crate::constants::LEVEL_STAR_THRESHOLDS;
use crate::maze::{generate_level, practice_normal_level_id, LevelParams, MazeError};
use crate::scoring::ScoreRules;
use crate::types::{Difficulty, Level};

pub const PRACTICE_LIVES: u32 = 3;
pub const PRACTICE_REVEAL_CHARGES: u32 = 3;
const MAX_TIER: u32 = 6;

const SIZE_TABLE: [(i32, i32); 18] = [
    (3, 3),
    (3, 4),
    (4, 4),
    (4, 5),
    (5, 5),
    (5, 6),
    (6, 6),
    (6, 7),
    (7, 7),
    (7, 8),
    (8, 8),
    (8, 9),
    (9, 9),
    (10, 10),
    (12, 12),
    (15, 15),
    (18, 18),
    (20, 20),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeLevelConfig {
    pub width: i32,
    pub height: i32,
    pub memorize_time: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeScoreTier {
    pub tier: u32,
    pub base_score: f64,
    pub time_loss_per_second: f64,
    pub path_help_loss_per_second: f64,
    pub reveal_cost: f64,
}

impl PracticeScoreTier {
    /// Practice runs have no crash-help penalty; crashes cost lives instead.
    pub fn score_rules(&self) -> ScoreRules {
        ScoreRules {
            points_start: self.base_score,
            loss_per_second: self.time_loss_per_second,
            loss_path_help_per_second: self.path_help_loss_per_second,
            loss_per_crash_help: 0.0,
            reveal_cost: self.reveal_cost,
            reveal_charges: PRACTICE_REVEAL_CHARGES,
        }
    }
}

/// Board for a 1-based level index; indices past the table reuse the last row.
pub fn practice_level_config(level_index: u32) -> PracticeLevelConfig {
    let idx = (level_index.max(1) as usize - 1).min(SIZE_TABLE.len() - 1);
    let (width, height) = SIZE_TABLE[idx];
    let cells = (width * height) as f64;
    PracticeLevelConfig {
        width,
        height,
        memorize_time: (cells / 6.0).round().clamp(5.0, 18.0) as u32,
    }
}

pub fn practice_score_tier(level_index: u32) -> PracticeScoreTier {
    let tier = ((level_index.max(1) - 1) / 3).min(MAX_TIER);
    let t = tier as f64;
    PracticeScoreTier {
        tier,
        base_score: 400.0 + t * 200.0,
        time_loss_per_second: 0.4 + t * 0.15,
        path_help_loss_per_second: 1.0 + t * 0.5,
        reveal_cost: 25.0 + t * 10.0,
    }
}

pub fn practice_level_params(level_index: u32, seed: Option<String>) -> LevelParams {
    let config = practice_level_config(level_index);
    LevelParams {
        width: config.width,
        height: config.height,
        difficulty: Difficulty::Normal,
        memorize_time: config.memorize_time,
        stars: LEVEL_STAR_THRESHOLDS.to_vec(),
        level_number: level_index.max(1),
        seed,
    }
}

/// Practice board with its own id space, so it never shares a catalog row
/// with a campaign level of the same number.
pub fn generate_practice_normal_level(
    level_index: u32,
    seed: Option<String>,
) -> Result<Level, MazeError> {
    let id = practice_normal_level_id(level_index.max(1), seed.as_deref());
    let mut params = practice_level_params(level_index, seed);
    params.seed = Some(params.seed.unwrap_or_else(|| id.clone()));
    let mut level = generate_level(&params)?;
    level.id = id;
    Ok(level)
}

/// Running state of one practice run: lives, accumulated score and best.
#[derive(Clone, Debug, PartialEq)]
pub struct PracticeRun {
    pub level_index: u32,
    pub lives: u32,
    pub total_score: f64,
    pub best_score: f64,
}

impl PracticeRun {
    pub fn new(best_score: f64) -> Self {
        Self {
            level_index: 1,
            lives: PRACTICE_LIVES,
            total_score: 0.0,
            best_score: best_score.max(0.0),
        }
    }

    pub fn complete_level(&mut self, level_points: f64) {
        if level_points.is_finite() && level_points > 0.0 {
            self.total_score += level_points;
        }
        self.level_index += 1;
        self.lives = PRACTICE_LIVES;
    }

    /// Returns `true` when the crash ended the run.
    pub fn lose_life(&mut self) -> bool {
        self.lives = self.lives.saturating_sub(1);
        if self.lives == 0 {
            self.finish();
            return true;
        }
        false
    }

    pub fn finish(&mut self) -> f64 {
        self.best_score = self.best_score.max(self.total_score);
        self.best_score
    }
}
