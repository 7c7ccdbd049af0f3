use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAZE_CONFIG_TTL_MS;
use crate::types::MazeAnalysis;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MazeRatingWeights {
    #[serde(rename = "pathLen")]
    pub path_len: f64,
    pub turns: f64,
    #[serde(rename = "intersectionDensity")]
    pub intersection_density: f64,
    #[serde(rename = "deadEnds")]
    pub dead_ends: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MazeRatingConfig {
    pub weights: MazeRatingWeights,
    pub scale: RatingScale,
}

impl Default for MazeRatingConfig {
    fn default() -> Self {
        Self {
            weights: MazeRatingWeights {
                path_len: 0.55,
                turns: 2.0,
                intersection_density: 40.0,
                dead_ends: 0.35,
            },
            scale: RatingScale {
                min: 20.0,
                max: 140.0,
            },
        }
    }
}

/// Reads a remotely stored config document field by field.
///
/// Missing or non-finite entries fall back to the defaults; an empty or
/// inverted scale is replaced as a whole.
pub fn parse_maze_rating_config(raw: Option<&Value>) -> MazeRatingConfig {
    let defaults = MazeRatingConfig::default();
    let weights = raw.and_then(|value| value.get("weights"));
    let scale = raw.and_then(|value| value.get("scale"));

    let mut config = MazeRatingConfig {
        weights: MazeRatingWeights {
            path_len: finite_field(weights, "pathLen").unwrap_or(defaults.weights.path_len),
            turns: finite_field(weights, "turns").unwrap_or(defaults.weights.turns),
            intersection_density: finite_field(weights, "intersectionDensity")
                .unwrap_or(defaults.weights.intersection_density),
            dead_ends: finite_field(weights, "deadEnds").unwrap_or(defaults.weights.dead_ends),
        },
        scale: RatingScale {
            min: finite_field(scale, "min").unwrap_or(defaults.scale.min),
            max: finite_field(scale, "max").unwrap_or(defaults.scale.max),
        },
    };
    if config.scale.max <= config.scale.min {
        config.scale = defaults.scale;
    }
    config
}

fn finite_field(object: Option<&Value>, key: &str) -> Option<f64> {
    object?
        .get(key)?
        .as_f64()
        .filter(|value| value.is_finite())
}

/// Weighted structural difficulty of a maze, rounded to 3 decimals.
pub fn compute_maze_rating(analysis: &MazeAnalysis, config: &MazeRatingConfig) -> f64 {
    let w = &config.weights;
    let rating = w.path_len * analysis.optimal_path_length as f64
        + w.turns * analysis.optimal_path_turns as f64
        + w.intersection_density * analysis.intersection_density
        + w.dead_ends * analysis.dead_ends as f64;
    round_to(rating, 3)
}

pub fn normalize_rating(rating: f64, scale: &RatingScale) -> f64 {
    if !rating.is_finite() {
        return 0.0;
    }
    let den = (scale.max - scale.min).max(1.0);
    ((rating - scale.min) / den).clamp(0.0, 1.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Clone, Debug)]
struct CachedConfig {
    value: MazeRatingConfig,
    loaded_at_ms: u64,
}

/// Time-based cache for the remote rating config. Callers pass `now_ms`.
#[derive(Clone, Debug)]
pub struct MazeRatingConfigCache {
    ttl_ms: u64,
    cached: Option<CachedConfig>,
}

impl Default for MazeRatingConfigCache {
    fn default() -> Self {
        Self::new(MAZE_CONFIG_TTL_MS)
    }
}

impl MazeRatingConfigCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            cached: None,
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn get(&self, now_ms: u64) -> Option<MazeRatingConfig> {
        let cached = self.cached.as_ref()?;
        if now_ms.saturating_sub(cached.loaded_at_ms) < self.ttl_ms {
            return Some(cached.value);
        }
        None
    }

    pub fn put(&mut self, value: MazeRatingConfig, now_ms: u64) {
        self.cached = Some(CachedConfig {
            value,
            loaded_at_ms: now_ms,
        });
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
