use serde_json::{Map, Value};

use crate::constants::MAX_MAZE_SIDE;
use crate::server_utils::{parse_mode, sanitize_user_id};
use crate::store::parse_timestamp_ms;
use crate::types::{AttemptMetrics, DdaMode, Level};

/// A finished play session as posted by a client.
#[derive(Debug)]
pub struct AttemptSubmission {
    pub user_id: String,
    pub mode: DdaMode,
    pub level: Level,
    pub attempt: AttemptMetrics,
    pub settings_snapshot: Option<Value>,
}

pub fn parse_attempt_submission(raw: &str) -> Option<AttemptSubmission> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;

    let user_id = sanitize_user_id(object.get("userId")?.as_str()?)?;
    let mode = parse_mode(object.get("mode")?.as_str()?)?;
    let level: Level = serde_json::from_value(object.get("level")?.clone()).ok()?;
    if !is_consistent_level(&level) {
        return None;
    }
    let attempt = parse_attempt_metrics(object.get("attempt")?.as_object()?)?;
    let settings_snapshot = match object.get("settingsSnapshot") {
        None | Some(Value::Null) => None,
        Some(value) if value.is_object() => Some(value.clone()),
        Some(_) => return None,
    };

    Some(AttemptSubmission {
        user_id,
        mode,
        level,
        attempt,
        settings_snapshot,
    })
}

fn is_consistent_level(level: &Level) -> bool {
    let grid = &level.maze;
    level.width >= 1
        && level.height >= 1
        && level.width <= MAX_MAZE_SIDE
        && level.height <= MAX_MAZE_SIDE
        && grid.height() == level.height
        && grid.rows.iter().all(|row| row.len() as i32 == level.width)
        && grid.contains(level.start)
        && grid.contains(level.exit)
        && !level.id.trim().is_empty()
}

fn parse_attempt_metrics(object: &Map<String, Value>) -> Option<AttemptMetrics> {
    let started_at = parse_timestamp(object.get("startedAt"))?;
    let ended_at = parse_timestamp(object.get("endedAt"))?;
    let completed = object.get("completed")?.as_bool()?;
    let fail_reason = match object.get("failReason") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_str()?.to_string()),
    };
    let skipped_memorize = match object.get("skippedMemorize") {
        None => false,
        Some(value) => value.as_bool()?,
    };

    Some(AttemptMetrics {
        started_at,
        ended_at,
        completed,
        fail_reason,
        time_seconds: parse_seconds(object.get("timeSeconds"))?,
        points_final: parse_seconds(object.get("pointsFinal"))?,
        stars: parse_count(object.get("stars"))?,
        moves: parse_count(object.get("moves"))?,
        crashes: parse_count(object.get("crashes"))?,
        revisits: parse_count(object.get("revisits"))?,
        reveal_used: parse_count(object.get("revealUsed"))?,
        path_help_seconds: parse_seconds(object.get("pathHelpSeconds"))?,
        crash_help_used: parse_count(object.get("crashHelpUsed"))?,
        skipped_memorize,
        memorize_time: parse_count(object.get("memorizeTime"))?,
    })
}

fn parse_timestamp(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    parse_timestamp_ms(text)?;
    Some(text.to_string())
}

/// Missing means zero; anything else must be a finite, non-negative number.
fn parse_seconds(value: Option<&Value>) -> Option<f64> {
    let Some(value) = value else {
        return Some(0.0);
    };
    let number = value.as_f64()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(number)
}

/// Missing means zero; fractional values are floored.
fn parse_count(value: Option<&Value>) -> Option<u32> {
    let Some(value) = value else {
        return Some(0);
    };
    if let Some(number) = value.as_u64() {
        return u32::try_from(number).ok();
    }
    let number = value.as_f64()?;
    if !number.is_finite() || number < 0.0 || number > u32::MAX as f64 {
        return None;
    }
    Some(number.floor() as u32)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::maze::{generate_level, LevelParams};
    use crate::types::Difficulty;

    fn level_json() -> Value {
        let level = generate_level(&LevelParams {
            width: 4,
            height: 3,
            difficulty: Difficulty::Normal,
            memorize_time: 10,
            stars: vec![60, 45, 30],
            level_number: 2,
            seed: Some("proto".to_string()),
        })
        .expect("level generates");
        serde_json::to_value(level).expect("level serializes")
    }

    fn body(attempt: Value) -> String {
        json!({
            "userId": " u-1 ",
            "mode": "campaign",
            "level": level_json(),
            "attempt": attempt,
        })
        .to_string()
    }

    fn attempt() -> Value {
        json!({
            "startedAt": "2026-03-01T10:00:00.000Z",
            "endedAt": "2026-03-01T10:00:40.000Z",
            "completed": true,
            "timeSeconds": 40.5,
            "pointsFinal": 910,
            "stars": 3,
            "moves": 17.8,
            "crashes": 0,
            "memorizeTime": 10
        })
    }

    #[test]
    fn parses_full_submission_with_defaults() {
        let parsed = parse_attempt_submission(&body(attempt())).expect("submission parses");
        assert_eq!(parsed.user_id, "u-1");
        assert_eq!(parsed.mode, DdaMode::Campaign);
        assert_eq!(parsed.level.id, "normal-level-2");
        assert_eq!(parsed.attempt.moves, 17);
        assert_eq!(parsed.attempt.reveal_used, 0);
        assert_eq!(parsed.attempt.path_help_seconds, 0.0);
        assert!(!parsed.attempt.skipped_memorize);
        assert!(parsed.settings_snapshot.is_none());
    }

    #[test]
    fn rejects_bad_numbers_and_timestamps() {
        let mut negative = attempt();
        negative["crashes"] = json!(-1);
        assert!(parse_attempt_submission(&body(negative)).is_none());

        let mut huge = attempt();
        huge["moves"] = json!(1e100);
        assert!(parse_attempt_submission(&body(huge)).is_none());

        let mut bad_time = attempt();
        bad_time["endedAt"] = json!("yesterday");
        assert!(parse_attempt_submission(&body(bad_time)).is_none());

        let mut missing = attempt();
        missing
            .as_object_mut()
            .expect("attempt is an object")
            .remove("completed");
        assert!(parse_attempt_submission(&body(missing)).is_none());
    }

    #[test]
    fn rejects_inconsistent_levels_and_users() {
        let mut level = level_json();
        level["width"] = json!(9);
        let raw = json!({
            "userId": "u1",
            "mode": "campaign",
            "level": level,
            "attempt": attempt(),
        })
        .to_string();
        assert!(parse_attempt_submission(&raw).is_none());

        let raw = json!({
            "userId": "bad user",
            "mode": "campaign",
            "level": level_json(),
            "attempt": attempt(),
        })
        .to_string();
        assert!(parse_attempt_submission(&raw).is_none());

        assert!(parse_attempt_submission("not json").is_none());
    }

    #[test]
    fn settings_snapshot_must_be_an_object() {
        let mut raw = json!({
            "userId": "u1",
            "mode": "practice_ia",
            "level": level_json(),
            "attempt": attempt(),
            "settingsSnapshot": { "volume": 3 },
        });
        let parsed = parse_attempt_submission(&raw.to_string()).expect("submission parses");
        assert_eq!(parsed.settings_snapshot, Some(json!({ "volume": 3 })));

        raw["settingsSnapshot"] = json!("loud");
        assert!(parse_attempt_submission(&raw.to_string()).is_none());
    }
}
