use crate::constants::{CAMPAIGN_LEVELS_PER_DIFFICULTY, MAX_MAZE_SIDE};
use crate::types::{DdaMode, Difficulty};

const MAX_USER_ID_LEN: usize = 64;
const MAX_SEED_LEN: usize = 64;

/// Trimmed user id, or `None` when empty, too long or carrying characters
/// outside `[A-Za-z0-9_.@-]`.
pub fn sanitize_user_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_USER_ID_LEN {
        return None;
    }
    let allowed = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'));
    allowed.then(|| trimmed.to_string())
}

pub fn normalize_dimension(value: Option<i64>, fallback: i32) -> i32 {
    value
        .map(|side| side.clamp(1, MAX_MAZE_SIDE as i64) as i32)
        .unwrap_or(fallback)
}

pub fn parse_dimension(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
}

pub fn normalize_seed(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_SEED_LEN).collect())
}

pub fn parse_difficulty(raw: Option<&str>, fallback: Difficulty) -> Option<Difficulty> {
    match raw {
        None => Some(fallback),
        Some(value) => Difficulty::parse(&value.trim().to_ascii_lowercase()),
    }
}

pub fn parse_mode(raw: &str) -> Option<DdaMode> {
    DdaMode::parse(&raw.trim().to_ascii_lowercase())
}

pub fn parse_campaign_level_number(raw: &str) -> Option<u32> {
    let number = raw.trim().parse::<u32>().ok()?;
    (1..=CAMPAIGN_LEVELS_PER_DIFFICULTY)
        .contains(&number)
        .then_some(number)
}

pub fn parse_practice_level_index(raw: &str) -> Option<u32> {
    let number = raw.trim().parse::<u32>().ok()?;
    (number >= 1).then_some(number)
}
