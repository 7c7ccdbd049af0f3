use crate::constants::{
    NEUTRAL_SKILL_MU, NEUTRAL_SKILL_SIGMA, PRIOR_SKILL_SIGMA, RECENCY_ALPHA, SKILL_WINDOW_SIZE,
};
use crate::rating::round_to;
use crate::types::{AttemptRow, DdaMode, Difficulty, UserSkillRow};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceWeights {
    pub success: f64,
    pub efficiency: f64,
    pub crash: f64,
    pub help: f64,
    pub revisit: f64,
    pub time: f64,
    pub crash_penalty_scale: f64,
    pub help_penalty_scale: f64,
    pub revisit_penalty_scale: f64,
    /// Seconds per optimal step at which the time penalty saturates.
    pub time_penalty_saturation: f64,
    pub path_help_seconds_per_use: f64,
    pub crash_helps_per_use: f64,
}

impl Default for PerformanceWeights {
    fn default() -> Self {
        Self {
            success: 0.40,
            efficiency: 0.22,
            crash: 0.14,
            help: 0.10,
            revisit: 0.07,
            time: 0.07,
            crash_penalty_scale: 6.0,
            help_penalty_scale: 3.0,
            revisit_penalty_scale: 2.0,
            time_penalty_saturation: 2.2,
            path_help_seconds_per_use: 10.0,
            crash_helps_per_use: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkillEstimatorOptions {
    pub window_size: usize,
    pub recency_alpha: f64,
    pub prior_sigma: f64,
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub performance: PerformanceWeights,
}

impl Default for SkillEstimatorOptions {
    fn default() -> Self {
        Self {
            window_size: SKILL_WINDOW_SIZE,
            recency_alpha: RECENCY_ALPHA,
            prior_sigma: PRIOR_SKILL_SIGMA,
            min_sigma: 0.12,
            max_sigma: 0.7,
            performance: PerformanceWeights::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttemptFeatures {
    pub success: f64,
    pub efficiency: f64,
    pub crash_rate: f64,
    pub revisit_rate: f64,
    pub help_rate: f64,
    pub time_per_step: f64,
    pub maze_rating: f64,
    pub performance: f64,
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

pub fn attempt_features(row: &AttemptRow, weights: &PerformanceWeights) -> AttemptFeatures {
    let moves = row.moves.max(1) as f64;
    let optimal = row.optimal_path_len.max(1) as f64;
    let time_seconds = non_negative(row.time_seconds);
    let path_help_seconds = non_negative(row.path_help_seconds);

    let success = if row.completed { 1.0 } else { 0.0 };
    let efficiency = (optimal / moves).clamp(0.0, 1.0);
    let crash_rate = (row.crashes as f64 / moves).clamp(0.0, 1.0);
    let revisit_rate = (row.revisits as f64 / moves).clamp(0.0, 1.0);
    let help_rate = ((row.reveal_used as f64
        + path_help_seconds / weights.path_help_seconds_per_use
        + row.crash_help_used as f64 / weights.crash_helps_per_use)
        / moves)
        .clamp(0.0, 1.0);
    // Seconds per optimal step; only its penalty is bounded.
    let time_per_step = time_seconds / optimal;

    let crash_penalty = (crash_rate * weights.crash_penalty_scale).clamp(0.0, 1.0);
    let help_penalty = (help_rate * weights.help_penalty_scale).clamp(0.0, 1.0);
    let revisit_penalty = (revisit_rate * weights.revisit_penalty_scale).clamp(0.0, 1.0);
    let time_penalty = (time_per_step / weights.time_penalty_saturation).clamp(0.0, 1.0);

    let performance = weights.success * success
        + weights.efficiency * efficiency
        + weights.crash * (1.0 - crash_penalty)
        + weights.help * (1.0 - help_penalty)
        + weights.revisit * (1.0 - revisit_penalty)
        + weights.time * (1.0 - time_penalty);

    AttemptFeatures {
        success,
        efficiency,
        crash_rate,
        revisit_rate,
        help_rate,
        time_per_step,
        maze_rating: if row.maze_rating.is_finite() {
            row.maze_rating
        } else {
            0.0
        },
        performance: performance.clamp(0.0, 1.0),
    }
}

/// `alpha^i` for `i = 0..count`; index 0 is the most recent attempt.
pub fn recency_weights(count: usize, alpha: f64) -> Vec<f64> {
    (0..count).map(|idx| alpha.powi(idx as i32)).collect()
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    let total = if total == 0.0 { 1.0 } else { total };
    let sum: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    sum / total
}

pub fn weighted_variance(values: &[f64], weights: &[f64], mean: f64) -> f64 {
    let total: f64 = weights.iter().sum();
    let total = if total == 0.0 { 1.0 } else { total };
    let sum: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum();
    sum / total
}

/// Signed length of the leading run of equal outcomes (newest first).
pub fn streak_signed(attempts: &[AttemptRow]) -> i32 {
    let Some(first) = attempts.first() else {
        return 0;
    };
    let count = attempts
        .iter()
        .take_while(|attempt| attempt.completed == first.completed)
        .count() as i32;
    if first.completed {
        count
    } else {
        -count
    }
}

pub fn neutral_skill_row(user_id: &str, mode: DdaMode, difficulty: Difficulty) -> UserSkillRow {
    UserSkillRow {
        user_id: user_id.to_string(),
        mode,
        difficulty,
        skill_mu: NEUTRAL_SKILL_MU,
        skill_sigma: NEUTRAL_SKILL_SIGMA,
        sample_count: 0,
        last_success_rate: None,
        last_efficiency: None,
        last_crash_rate: None,
        last_help_rate: None,
        last_time_per_step: None,
        last_maze_rating: None,
        streak_signed: Some(0),
        updated_at: None,
    }
}

/// Recomputes a skill row from the newest-first attempt window.
pub fn compute_skill_row(
    user_id: &str,
    mode: DdaMode,
    difficulty: Difficulty,
    attempts: &[AttemptRow],
    options: &SkillEstimatorOptions,
    updated_at: Option<String>,
) -> UserSkillRow {
    if attempts.is_empty() {
        return UserSkillRow {
            updated_at,
            ..neutral_skill_row(user_id, mode, difficulty)
        };
    }

    let features: Vec<AttemptFeatures> = attempts
        .iter()
        .map(|attempt| attempt_features(attempt, &options.performance))
        .collect();
    let weights = recency_weights(features.len(), options.recency_alpha);
    let mean_of = |pick: fn(&AttemptFeatures) -> f64| {
        let values: Vec<f64> = features.iter().map(pick).collect();
        weighted_mean(&values, &weights)
    };

    let scores: Vec<f64> = features.iter().map(|f| f.performance).collect();
    let mu = weighted_mean(&scores, &weights);
    let variance = weighted_variance(&scores, &weights, mu);
    let raw_sigma = variance.max(1e-4).sqrt();
    let window = options.window_size.max(1) as f64;
    let coverage = (features.len() as f64 / window).clamp(0.0, 1.0);
    let sigma = (raw_sigma * coverage + options.prior_sigma * (1.0 - coverage))
        .clamp(options.min_sigma, options.max_sigma);

    UserSkillRow {
        user_id: user_id.to_string(),
        mode,
        difficulty,
        skill_mu: round_to(mu, 4),
        skill_sigma: round_to(sigma, 4),
        sample_count: features.len() as u32,
        last_success_rate: Some(round_to(mean_of(|f| f.success), 4)),
        last_efficiency: Some(round_to(mean_of(|f| f.efficiency), 4)),
        last_crash_rate: Some(round_to(mean_of(|f| f.crash_rate), 4)),
        last_help_rate: Some(round_to(mean_of(|f| f.help_rate), 4)),
        last_time_per_step: Some(round_to(mean_of(|f| f.time_per_step), 4)),
        last_maze_rating: Some(round_to(mean_of(|f| f.maze_rating), 3)),
        streak_signed: Some(streak_signed(attempts)),
        updated_at,
    }
}

/// Merges per-difficulty rows of one mode, weighting each by its sample count.
pub fn aggregate_skill_rows(rows: &[UserSkillRow]) -> Option<UserSkillRow> {
    let first = rows.first()?;
    let weights: Vec<f64> = rows.iter().map(|r| r.sample_count.max(1) as f64).collect();
    let mean_of = |pick: fn(&UserSkillRow) -> f64| {
        let values: Vec<f64> = rows.iter().map(pick).collect();
        weighted_mean(&values, &weights)
    };

    Some(UserSkillRow {
        user_id: first.user_id.clone(),
        mode: first.mode,
        difficulty: first.difficulty,
        skill_mu: round_to(mean_of(|r| r.skill_mu), 4),
        skill_sigma: round_to(mean_of(|r| r.skill_sigma), 4),
        sample_count: rows.iter().map(|r| r.sample_count).sum(),
        last_success_rate: Some(round_to(
            mean_of(|r| r.last_success_rate.unwrap_or(0.7)),
            4,
        )),
        last_efficiency: Some(round_to(mean_of(|r| r.last_efficiency.unwrap_or(0.6)), 4)),
        last_crash_rate: Some(round_to(mean_of(|r| r.last_crash_rate.unwrap_or(0.2)), 4)),
        last_help_rate: Some(round_to(mean_of(|r| r.last_help_rate.unwrap_or(0.25)), 4)),
        last_time_per_step: Some(round_to(
            mean_of(|r| r.last_time_per_step.unwrap_or(1.4)),
            4,
        )),
        last_maze_rating: Some(round_to(mean_of(|r| r.last_maze_rating.unwrap_or(0.0)), 3)),
        streak_signed: Some(0),
        updated_at: rows.iter().filter_map(|r| r.updated_at.clone()).max(),
    })
}
