//! Closed-loop difficulty controller.
//!
//! Every coefficient lives in [`DdaTunerOptions`]. The defaults were tuned by
//! hand against play data and are meant to be overridden, not trusted.

use crate::constants::{DDA_STAR_THRESHOLDS, POINTS_START};
use crate::rating::{normalize_rating, RatingScale};
use crate::types::{DdaTuning, Difficulty, PracticeIaParams, UserSkillRow};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowTargets {
    pub success: f64,
    pub crash_rate: f64,
    pub help_rate: f64,
    pub time_per_step: f64,
    pub performance: f64,
}

impl Default for FlowTargets {
    fn default() -> Self {
        Self {
            success: 0.7,
            crash_rate: 0.2,
            help_rate: 0.25,
            time_per_step: 1.4,
            performance: 0.65,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowGains {
    pub success: f64,
    pub crash_rate: f64,
    pub help_rate: f64,
    pub time_per_step: f64,
    pub limit: f64,
    pub min_time_per_step: f64,
    pub max_time_per_step: f64,
}

impl Default for FlowGains {
    fn default() -> Self {
        Self {
            success: 0.8,
            crash_rate: 0.6,
            help_rate: 0.45,
            time_per_step: 0.35,
            limit: 0.3,
            min_time_per_step: 0.4,
            max_time_per_step: 3.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressureMix {
    pub mu_flow_gain: f64,
    pub base_limit: f64,
    pub perf_limit: f64,
    pub min_stability: f64,
    pub max_stability: f64,
    pub base_weight: f64,
    pub flow_weight: f64,
    pub perf_weight: f64,
    pub limit: f64,
}

impl Default for PressureMix {
    fn default() -> Self {
        Self {
            mu_flow_gain: 0.25,
            base_limit: 0.6,
            perf_limit: 0.35,
            min_stability: 0.15,
            max_stability: 0.85,
            base_weight: 0.55,
            flow_weight: 0.25,
            perf_weight: 0.20,
            limit: 0.45,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreakPolicy {
    pub limit: i32,
    pub win_step: f64,
    pub loss_step: f64,
    pub max_extra: i32,
    pub max_ease: i32,
    pub max_hard: i32,
}

impl Default for StreakPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            win_step: 0.06,
            loss_step: 0.08,
            max_extra: 3,
            max_ease: 2,
            max_hard: 1,
        }
    }
}

/// `clamp(base + pressure * pressure_gain + flow * flow_gain, min, max)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearRule {
    pub base: f64,
    pub pressure_gain: f64,
    pub flow_gain: f64,
    pub min: f64,
    pub max: f64,
}

impl LinearRule {
    pub const fn new(base: f64, pressure_gain: f64, flow_gain: f64, min: f64, max: f64) -> Self {
        Self {
            base,
            pressure_gain,
            flow_gain,
            min,
            max,
        }
    }

    pub fn apply(&self, pressure: f64, flow: f64) -> f64 {
        (self.base + pressure * self.pressure_gain + flow * self.flow_gain).clamp(self.min, self.max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoringRules {
    pub points_start: f64,
    pub memorize_pressure_gain: f64,
    pub memorize_flow_gain: f64,
    pub min_memorize_time: u32,
    pub max_memorize_time: u32,
    pub reveal_charges: LinearRule,
    pub points_loss_per_second: LinearRule,
    pub points_loss_path_help: LinearRule,
    pub points_loss_crash_help: LinearRule,
    pub points_cost_reveal: LinearRule,
    pub star_thresholds: Vec<i32>,
    pub star_multiplier: LinearRule,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            points_start: POINTS_START,
            memorize_pressure_gain: 0.35,
            memorize_flow_gain: 1.5,
            min_memorize_time: 3,
            max_memorize_time: 30,
            reveal_charges: LinearRule::new(3.0, -2.0, -1.0, 1.0, 4.0),
            points_loss_per_second: LinearRule::new(1.4, 1.1, 0.0, 0.6, 3.2),
            points_loss_path_help: LinearRule::new(2.0, 1.3, 0.6, 0.5, 4.5),
            points_loss_crash_help: LinearRule::new(20.0, 8.0, 0.0, 10.0, 35.0),
            points_cost_reveal: LinearRule::new(70.0, 22.0, 0.0, 30.0, 110.0),
            star_thresholds: DDA_STAR_THRESHOLDS.to_vec(),
            star_multiplier: LinearRule::new(1.0, -0.1, 0.0, 0.85, 1.1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PracticeIaPolicy {
    pub mu_flow_gain: f64,
    pub min_size: i32,
    pub max_size: i32,
    pub size_span: f64,
    pub cells_per_memorize_second: f64,
    pub min_base_memorize: i32,
    pub max_base_memorize: i32,
    pub min_memorize: i32,
    pub max_memorize: i32,
    pub hard_threshold: f64,
}

impl Default for PracticeIaPolicy {
    fn default() -> Self {
        Self {
            mu_flow_gain: 0.2,
            min_size: 5,
            max_size: 18,
            size_span: 10.0,
            cells_per_memorize_second: 7.0,
            min_base_memorize: 6,
            max_base_memorize: 20,
            min_memorize: 4,
            max_memorize: 28,
            hard_threshold: 0.8,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DdaTunerOptions {
    pub flow_targets: FlowTargets,
    pub flow_gains: FlowGains,
    pub pressure: PressureMix,
    pub streak: StreakPolicy,
    pub scoring: ScoringRules,
    pub practice: PracticeIaPolicy,
}

/// Skill inputs after clamping every field to its valid domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SanitizedSkill {
    pub mu: f64,
    pub sigma: f64,
    pub streak: i32,
    pub success: f64,
    pub crash_rate: f64,
    pub help_rate: f64,
    pub time_per_step: f64,
}

fn bounded(value: Option<f64>, fallback: f64, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => fallback.clamp(min, max),
    }
}

pub fn sanitize_skill(skill: Option<&UserSkillRow>, options: &DdaTunerOptions) -> SanitizedSkill {
    let targets = &options.flow_targets;
    let gains = &options.flow_gains;
    let limit = options.streak.limit;
    SanitizedSkill {
        mu: bounded(skill.map(|s| s.skill_mu), 0.5, 0.0, 1.0),
        sigma: bounded(skill.map(|s| s.skill_sigma), 1.0, 0.08, 1.0),
        streak: skill
            .and_then(|s| s.streak_signed)
            .unwrap_or(0)
            .clamp(-limit, limit),
        success: bounded(skill.and_then(|s| s.last_success_rate), targets.success, 0.0, 1.0),
        crash_rate: bounded(skill.and_then(|s| s.last_crash_rate), targets.crash_rate, 0.0, 1.0),
        help_rate: bounded(skill.and_then(|s| s.last_help_rate), targets.help_rate, 0.0, 1.0),
        time_per_step: bounded(
            skill.and_then(|s| s.last_time_per_step),
            targets.time_per_step,
            gains.min_time_per_step,
            gains.max_time_per_step,
        ),
    }
}

/// Distance from the flow zone; positive means the player is doing better
/// than target on balance.
pub fn flow_delta(skill: &SanitizedSkill, options: &DdaTunerOptions) -> f64 {
    let t = &options.flow_targets;
    let g = &options.flow_gains;
    let delta = (skill.success - t.success) * g.success
        + (t.crash_rate - skill.crash_rate) * g.crash_rate
        + (t.help_rate - skill.help_rate) * g.help_rate
        + (t.time_per_step - skill.time_per_step) * g.time_per_step;
    delta.clamp(-g.limit, g.limit)
}

pub fn streak_adjustment(streak: i32, policy: &StreakPolicy) -> f64 {
    if streak >= 2 {
        policy.win_step * (streak - 1).min(policy.max_extra) as f64
    } else if streak <= -2 {
        -policy.loss_step * (streak.abs() - 1).min(policy.max_extra) as f64
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressureBreakdown {
    pub flow_delta: f64,
    pub mu_adjusted: f64,
    pub rating_norm: f64,
    pub base_pressure: f64,
    pub perf_delta: f64,
    pub stability: f64,
    pub streak_adjustment: f64,
    pub pressure: f64,
}

pub fn compute_pressure(
    skill: &SanitizedSkill,
    maze_rating: f64,
    scale: &RatingScale,
    options: &DdaTunerOptions,
) -> PressureBreakdown {
    let mix = &options.pressure;
    let flow = flow_delta(skill, options);
    let rating_norm = normalize_rating(maze_rating, scale);
    let mu_adjusted = (skill.mu + flow * mix.mu_flow_gain).clamp(0.0, 1.0);
    let base_pressure = (mu_adjusted - rating_norm).clamp(-mix.base_limit, mix.base_limit);
    let perf_delta =
        (skill.mu - options.flow_targets.performance).clamp(-mix.perf_limit, mix.perf_limit);
    let stability = (1.0 - skill.sigma).clamp(mix.min_stability, mix.max_stability);
    let streak_adj = streak_adjustment(skill.streak, &options.streak);
    let pressure = ((mix.base_weight * base_pressure
        + mix.flow_weight * flow
        + mix.perf_weight * perf_delta)
        * stability
        + streak_adj)
        .clamp(-mix.limit, mix.limit);

    PressureBreakdown {
        flow_delta: flow,
        mu_adjusted,
        rating_norm,
        base_pressure,
        perf_delta,
        stability,
        streak_adjustment: streak_adj,
        pressure,
    }
}

pub fn tuning_from_skill(
    skill: Option<&UserSkillRow>,
    base_memorize_time: u32,
    maze_rating: f64,
    scale: &RatingScale,
    options: &DdaTunerOptions,
) -> DdaTuning {
    let sanitized = sanitize_skill(skill, options);
    let breakdown = compute_pressure(&sanitized, maze_rating, scale, options);
    let pressure = breakdown.pressure;
    let flow = breakdown.flow_delta;
    let rules = &options.scoring;
    let streak = &options.streak;

    let streak_ease = if sanitized.streak <= -2 {
        (sanitized.streak.abs() - 1).min(streak.max_ease)
    } else {
        0
    } as f64;
    let streak_hard = if sanitized.streak >= 2 {
        (sanitized.streak - 1).min(streak.max_hard)
    } else {
        0
    } as f64;

    let memorize_time = (base_memorize_time as f64 * (1.0 - pressure * rules.memorize_pressure_gain)
        - flow * rules.memorize_flow_gain
        + streak_ease
        - streak_hard)
        .round()
        .clamp(rules.min_memorize_time as f64, rules.max_memorize_time as f64);

    let reveal = &rules.reveal_charges;
    let reveal_charges = (reveal.base
        + pressure * reveal.pressure_gain
        + flow * reveal.flow_gain
        + streak_ease
        - streak_hard)
        .round()
        .clamp(reveal.min, reveal.max);

    let star_multiplier = rules.star_multiplier.apply(pressure, flow);
    let star_thresholds = rules
        .star_thresholds
        .iter()
        .map(|value| ((*value as f64 * star_multiplier).round() as i32).max(1))
        .collect();

    DdaTuning {
        memorize_time: memorize_time as u32,
        reveal_charges: reveal_charges as u32,
        points_start: rules.points_start,
        points_loss_per_second: rules.points_loss_per_second.apply(pressure, flow),
        points_loss_path_help: rules.points_loss_path_help.apply(pressure, flow),
        points_loss_crash_help: rules.points_loss_crash_help.apply(pressure, flow),
        points_cost_reveal: rules.points_cost_reveal.apply(pressure, flow),
        star_thresholds,
    }
}

/// Board shape for the adaptive practice mode, before a seed is attached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PracticeShape {
    pub width: i32,
    pub height: i32,
    pub memorize_time: u32,
    pub difficulty: Difficulty,
}

pub fn practice_shape_from_skill(
    skill: Option<&UserSkillRow>,
    options: &DdaTunerOptions,
) -> PracticeShape {
    let policy = &options.practice;
    let sanitized = sanitize_skill(skill, options);
    let flow = flow_delta(&sanitized, options);
    let mu_adjusted = (sanitized.mu + flow * policy.mu_flow_gain).clamp(0.0, 1.0);

    let size = ((policy.min_size as f64 + mu_adjusted * policy.size_span).round() as i32)
        .clamp(policy.min_size, policy.max_size);
    let width = size;
    let height = size;

    let base_memorize = (((width * height) as f64 / policy.cells_per_memorize_second).round()
        as i32)
        .clamp(policy.min_base_memorize, policy.max_base_memorize);
    let memorize_time = (base_memorize + memorize_band(mu_adjusted))
        .clamp(policy.min_memorize, policy.max_memorize);

    let difficulty = if mu_adjusted > policy.hard_threshold {
        Difficulty::Hard
    } else {
        Difficulty::Normal
    };

    PracticeShape {
        width,
        height,
        memorize_time: memorize_time as u32,
        difficulty,
    }
}

pub fn practice_ia_params_from_skill(
    skill: Option<&UserSkillRow>,
    seed: String,
    options: &DdaTunerOptions,
) -> PracticeIaParams {
    let shape = practice_shape_from_skill(skill, options);
    PracticeIaParams {
        width: shape.width,
        height: shape.height,
        memorize_time: shape.memorize_time,
        difficulty: shape.difficulty,
        seed,
    }
}

impl PracticeIaParams {
    /// Board served when the skill lookup itself could not run.
    pub fn fallback(seed: String) -> Self {
        Self {
            width: 7,
            height: 7,
            memorize_time: 12,
            difficulty: Difficulty::Normal,
            seed,
        }
    }
}

fn memorize_band(mu_adjusted: f64) -> i32 {
    if mu_adjusted < 0.35 {
        4
    } else if mu_adjusted < 0.55 {
        2
    } else if mu_adjusted > 0.85 {
        -3
    } else if mu_adjusted > 0.7 {
        -1
    } else {
        0
    }
}
