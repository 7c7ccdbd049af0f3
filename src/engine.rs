use chrono::{DateTime, SecondsFormat};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::{MAZE_CONFIG_TTL_MS, MAZE_RATING_CONFIG_ID, SKILL_MODES};
use crate::dda::{practice_ia_params_from_skill, tuning_from_skill, DdaTunerOptions};
use crate::rating::{
    compute_maze_rating, parse_maze_rating_config, MazeRatingConfig, MazeRatingConfigCache,
};
use crate::rng::{create_seed, now_ms};
use crate::skill::{aggregate_skill_rows, compute_skill_row, SkillEstimatorOptions};
use crate::store::{DdaStore, StoreResult};
use crate::types::{
    AttemptRow, DdaMode, DdaTuning, Difficulty, Level, LevelCatalogEntry, MazeAnalysis,
    PracticeIaParams, RecordAttemptInput, UserSkillRow,
};

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub skill: SkillEstimatorOptions,
    pub tuner: DdaTunerOptions,
    pub config_ttl_ms: u64,
    /// Modes whose attempts feed the skill estimator.
    pub skill_modes: Vec<DdaMode>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            skill: SkillEstimatorOptions::default(),
            tuner: DdaTunerOptions::default(),
            config_ttl_ms: MAZE_CONFIG_TTL_MS,
            skill_modes: SKILL_MODES.to_vec(),
        }
    }
}

/// Ties the pure estimator and tuner to a persistence backend.
///
/// Read paths never fail: store errors are logged and replaced by defaults so
/// that gameplay keeps going. Only attempt recording reports errors.
pub struct DdaEngine<S> {
    store: S,
    options: EngineOptions,
    config_cache: Mutex<MazeRatingConfigCache>,
    clock: fn() -> u64,
}

impl<S: DdaStore> DdaEngine<S> {
    pub fn new(store: S, options: EngineOptions) -> Self {
        let config_cache = Mutex::new(MazeRatingConfigCache::new(options.config_ttl_ms));
        Self {
            store,
            options,
            config_cache,
            clock: now_ms,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn is_skill_mode(&self, mode: DdaMode) -> bool {
        self.options.skill_modes.contains(&mode)
    }

    pub async fn maze_rating_config(&self) -> MazeRatingConfig {
        let now_ms = (self.clock)();
        let mut cache = self.config_cache.lock().await;
        if let Some(config) = cache.get(now_ms) {
            return config;
        }

        let config = match self.store.select_dda_config(MAZE_RATING_CONFIG_ID).await {
            Ok(raw) => parse_maze_rating_config(raw.as_ref()),
            Err(error) => {
                if !error.is_missing_relation() {
                    warn!("[dda] failed to load maze rating config: {error}");
                }
                MazeRatingConfig::default()
            }
        };
        debug!(
            "[dda] maze rating config refreshed at {now_ms}, ttl {}ms",
            cache.ttl_ms()
        );
        cache.put(config, now_ms);
        config
    }

    pub async fn invalidate_config_cache(&self) {
        self.config_cache.lock().await.invalidate();
    }

    pub async fn rate_maze(&self, analysis: &MazeAnalysis) -> f64 {
        let config = self.maze_rating_config().await;
        compute_maze_rating(analysis, &config)
    }

    /// Recomputes and stores the skill row from the latest attempt window.
    ///
    /// Returns `Ok(None)` when a table is not there yet.
    pub async fn refresh_skill(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> StoreResult<Option<UserSkillRow>> {
        let attempts = match self
            .store
            .select_recent_attempts(user_id, mode, difficulty, self.options.skill.window_size)
            .await
        {
            Ok(rows) => rows,
            Err(error) if error.is_missing_relation() => {
                warn!("[dda] skipping skill refresh for {user_id}: {error}");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let updated_at = if attempts.is_empty() {
            None
        } else {
            Some(self.timestamp())
        };
        let row = compute_skill_row(
            user_id,
            mode,
            difficulty,
            &attempts,
            &self.options.skill,
            updated_at,
        );

        match self.store.upsert_skill_row(row.clone()).await {
            Ok(()) => {
                debug!(
                    "[dda] skill {user_id}/{}/{} mu={} sigma={} n={}",
                    mode.as_str(),
                    difficulty.as_str(),
                    row.skill_mu,
                    row.skill_sigma,
                    row.sample_count
                );
                Ok(Some(row))
            }
            Err(error) if error.is_missing_relation() => {
                warn!("[dda] skill table not ready: {error}");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn get_skill(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> Option<UserSkillRow> {
        match self.store.select_skill_row(user_id, mode, difficulty).await {
            Ok(row) => row,
            Err(error) => {
                warn!("[dda] failed to read skill for {user_id}: {error}");
                None
            }
        }
    }

    /// Sample-weighted merge of every difficulty the player has in `mode`.
    pub async fn get_aggregated_skill(&self, user_id: &str, mode: DdaMode) -> Option<UserSkillRow> {
        match self.store.select_skill_rows(user_id, mode).await {
            Ok(rows) => aggregate_skill_rows(&rows),
            Err(error) => {
                warn!("[dda] failed to aggregate skill for {user_id}: {error}");
                None
            }
        }
    }

    pub async fn recommend_tuning(
        &self,
        user_id: &str,
        mode: DdaMode,
        level: &Level,
        analysis: &MazeAnalysis,
    ) -> DdaTuning {
        let config = self.maze_rating_config().await;
        let rating = compute_maze_rating(analysis, &config);
        let skill = self.get_skill(user_id, mode, level.difficulty).await;
        tuning_from_skill(
            skill.as_ref(),
            level.memorize_time,
            rating,
            &config.scale,
            &self.options.tuner,
        )
    }

    pub async fn recommend_practice_params(&self, user_id: &str) -> PracticeIaParams {
        let skill = match self.get_aggregated_skill(user_id, DdaMode::PracticeIa).await {
            Some(row) => Some(row),
            None => self.get_aggregated_skill(user_id, DdaMode::Campaign).await,
        };
        let seed = create_seed((self.clock)());
        practice_ia_params_from_skill(skill.as_ref(), seed, &self.options.tuner)
    }

    pub async fn ensure_level_catalog_row(
        &self,
        level: &Level,
        analysis: &MazeAnalysis,
        maze_rating: Option<f64>,
    ) -> StoreResult<()> {
        let rating = match maze_rating.filter(|value| value.is_finite()) {
            Some(value) => value,
            None => self.rate_maze(analysis).await,
        };
        self.store
            .upsert_level_catalog_entry(level_catalog_entry(level, analysis, rating))
            .await
    }

    /// Catalog upsert, attempt insert and, for skill-tracked modes, a skill
    /// refresh. A missing skill table is logged and skipped.
    pub async fn record_attempt_and_update_skill(
        &self,
        input: &RecordAttemptInput,
    ) -> StoreResult<()> {
        let rating = self.rate_maze(&input.analysis).await;
        self.ensure_level_catalog_row(&input.level, &input.analysis, Some(rating))
            .await?;
        self.store.insert_attempt(attempt_row(input, rating)).await?;

        if self.is_skill_mode(input.mode) {
            self.refresh_skill(&input.user_id, input.mode, input.level.difficulty)
                .await?;
        }
        Ok(())
    }

    fn timestamp(&self) -> String {
        let millis = (self.clock)().min(i64::MAX as u64) as i64;
        DateTime::from_timestamp_millis(millis)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub fn level_catalog_entry(level: &Level, analysis: &MazeAnalysis, rating: f64) -> LevelCatalogEntry {
    LevelCatalogEntry {
        level_id: level.id.clone(),
        difficulty: level.difficulty,
        level_number: level.number,
        width: level.width,
        height: level.height,
        memorize_time_default: level.memorize_time,
        optimal_path_len: analysis.optimal_path_length,
        optimal_turns: analysis.optimal_path_turns,
        intersection_density: analysis.intersection_density,
        dead_ends: analysis.dead_ends,
        maze_rating: rating,
        analysis_json: serde_json::to_value(analysis).unwrap_or_default(),
    }
}

pub fn attempt_row(input: &RecordAttemptInput, rating: f64) -> AttemptRow {
    let attempt = &input.attempt;
    AttemptRow {
        user_id: input.user_id.clone(),
        mode: input.mode,
        level_id: input.level.id.clone(),
        difficulty: input.level.difficulty,
        level_number: input.level.number,
        width: input.level.width,
        height: input.level.height,
        memorize_time: attempt.memorize_time,
        started_at: attempt.started_at.clone(),
        ended_at: attempt.ended_at.clone(),
        completed: attempt.completed,
        fail_reason: attempt.fail_reason.clone(),
        time_seconds: attempt.time_seconds,
        points_final: attempt.points_final,
        stars: attempt.stars,
        moves: attempt.moves,
        crashes: attempt.crashes,
        revisits: attempt.revisits,
        reveal_used: attempt.reveal_used,
        path_help_seconds: attempt.path_help_seconds,
        crash_help_used: attempt.crash_help_used,
        skipped_memorize: attempt.skipped_memorize,
        optimal_path_len: input.analysis.optimal_path_length,
        optimal_turns: input.analysis.optimal_path_turns,
        maze_rating: rating,
        settings_snapshot: input.settings_snapshot.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use serde_json::json;

    use super::*;
    use crate::constants::LEVEL_STAR_THRESHOLDS;
    use crate::maze::{generate_level, LevelParams};
    use crate::maze_stats::analyze_level;
    use crate::store::{MemoryStore, StoreState, Table};
    use crate::types::AttemptMetrics;

    fn level_x(difficulty: Difficulty) -> Level {
        generate_level(&LevelParams {
            width: 7,
            height: 7,
            difficulty,
            memorize_time: 10,
            stars: LEVEL_STAR_THRESHOLDS.to_vec(),
            level_number: 1,
            seed: Some("X".to_string()),
        })
        .expect("level generates")
    }

    fn metrics(completed: bool, ended_at: &str) -> AttemptMetrics {
        AttemptMetrics {
            started_at: "2026-03-01T10:00:00.000Z".to_string(),
            ended_at: ended_at.to_string(),
            completed,
            fail_reason: if completed {
                None
            } else {
                Some("crashes".to_string())
            },
            time_seconds: 30.0,
            points_final: 820.0,
            stars: 3,
            moves: 22,
            crashes: 1,
            revisits: 2,
            reveal_used: 0,
            path_help_seconds: 0.0,
            crash_help_used: 0,
            skipped_memorize: false,
            memorize_time: 10,
        }
    }

    fn input(mode: DdaMode, completed: bool, ended_at: &str) -> RecordAttemptInput {
        let level = level_x(Difficulty::Easy);
        let analysis = analyze_level(&level);
        RecordAttemptInput {
            user_id: "u1".to_string(),
            mode,
            level,
            analysis,
            attempt: metrics(completed, ended_at),
            settings_snapshot: Some(json!({ "theme": "dark" })),
        }
    }

    fn engine() -> DdaEngine<MemoryStore> {
        DdaEngine::new(MemoryStore::new(), EngineOptions::default())
    }

    #[tokio::test]
    async fn new_player_gets_playable_tuning_for_seeded_level() {
        let engine = engine();
        let level = level_x(Difficulty::Easy);
        let analysis = analyze_level(&level);
        assert_eq!(analysis.total_cells, 49);
        assert!((1..=48).contains(&analysis.optimal_path_length));

        let tuning = engine
            .recommend_tuning("nobody", DdaMode::Campaign, &level, &analysis)
            .await;
        assert!((3..=30).contains(&tuning.memorize_time));
        assert!((1..=4).contains(&tuning.reveal_charges));
        assert_eq!(tuning.points_start, 1000.0);
    }

    #[tokio::test]
    async fn recording_campaign_attempt_refreshes_skill() {
        let engine = engine();
        engine
            .record_attempt_and_update_skill(&input(
                DdaMode::Campaign,
                true,
                "2026-03-01T10:01:00.000Z",
            ))
            .await
            .expect("record works");

        let state = engine.store().snapshot().await;
        assert_eq!(state.attempts.len(), 1);
        assert_eq!(state.attempts[0].level_id, "easy-level-1");
        assert!(state.attempts[0].maze_rating > 0.0);
        assert_eq!(state.attempts[0].settings_snapshot, Some(json!({ "theme": "dark" })));
        assert!(state.catalog.contains_key("easy-level-1"));

        let skill = engine
            .get_skill("u1", DdaMode::Campaign, Difficulty::Easy)
            .await
            .expect("skill row exists");
        assert_eq!(skill.sample_count, 1);
        assert_eq!(skill.streak_signed, Some(1));
        assert!(skill.updated_at.is_some());
        assert!((0.0..=1.0).contains(&skill.skill_mu));
    }

    #[tokio::test]
    async fn non_skill_modes_only_log_attempts() {
        let engine = engine();
        engine
            .record_attempt_and_update_skill(&input(
                DdaMode::PracticeFree,
                true,
                "2026-03-01T10:01:00.000Z",
            ))
            .await
            .expect("record works");
        let state = engine.store().snapshot().await;
        assert_eq!(state.attempts.len(), 1);
        assert!(state.skills.is_empty());
    }

    #[tokio::test]
    async fn missing_skill_table_does_not_break_recording() {
        let engine = engine();
        engine.store().drop_table(Table::UserSkill).await;
        engine
            .record_attempt_and_update_skill(&input(
                DdaMode::Campaign,
                false,
                "2026-03-01T10:01:00.000Z",
            ))
            .await
            .expect("missing skill table is tolerated");
        assert_eq!(engine.store().snapshot().await.attempts.len(), 1);
        assert!(engine
            .get_skill("u1", DdaMode::Campaign, Difficulty::Easy)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn backend_failure_on_insert_is_reported() {
        let engine = engine();
        engine.store().drop_table(Table::Attempts).await;
        let error = engine
            .record_attempt_and_update_skill(&input(
                DdaMode::Campaign,
                true,
                "2026-03-01T10:01:00.000Z",
            ))
            .await
            .expect_err("insert fails");
        assert!(error.is_missing_relation());

        let engine = self::engine();
        engine.store().set_offline(true).await;
        assert!(engine
            .record_attempt_and_update_skill(&input(
                DdaMode::Campaign,
                true,
                "2026-03-01T10:01:00.000Z",
            ))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn refresh_without_attempts_writes_neutral_row() {
        let mut prior = crate::skill::neutral_skill_row("u1", DdaMode::PracticeIa, Difficulty::Hard);
        prior.skill_mu = 0.93;
        prior.skill_sigma = 0.15;
        prior.sample_count = 12;
        prior.streak_signed = Some(4);
        prior.updated_at = Some("2026-01-01T00:00:00.000Z".to_string());
        let engine = DdaEngine::new(
            MemoryStore::with_state(StoreState {
                skills: vec![prior],
                ..StoreState::default()
            }),
            EngineOptions::default(),
        );

        let row = engine
            .refresh_skill("u1", DdaMode::PracticeIa, Difficulty::Hard)
            .await
            .expect("refresh works")
            .expect("row written");
        assert_eq!(row.skill_mu, 0.5);
        assert_eq!(row.skill_sigma, 0.5);
        assert_eq!(row.sample_count, 0);
        assert!(row.updated_at.is_none());

        let stored = engine
            .get_skill("u1", DdaMode::PracticeIa, Difficulty::Hard)
            .await
            .expect("row stored");
        assert_eq!(stored, row);
        assert_eq!(engine.store().snapshot().await.skills.len(), 1);
    }

    #[tokio::test]
    async fn aggregated_skill_weights_by_samples() {
        let engine = engine();
        let mut easy = crate::skill::neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Easy);
        easy.skill_mu = 0.2;
        easy.sample_count = 10;
        let mut hard = crate::skill::neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Hard);
        hard.skill_mu = 0.6;
        hard.sample_count = 30;
        engine.store().upsert_skill_row(easy).await.expect("upsert works");
        engine.store().upsert_skill_row(hard).await.expect("upsert works");

        let merged = engine
            .get_aggregated_skill("u1", DdaMode::Campaign)
            .await
            .expect("rows exist");
        assert!((merged.skill_mu - 0.5).abs() < 1e-9);
        assert_eq!(merged.sample_count, 40);
    }

    #[tokio::test]
    async fn practice_params_fall_back_to_campaign_skill() {
        let engine = engine();
        let neutral = engine.recommend_practice_params("u1").await;
        assert_eq!((neutral.width, neutral.height), (10, 10));

        let mut strong = crate::skill::neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Easy);
        strong.skill_mu = 1.0;
        strong.sample_count = 12;
        engine.store().upsert_skill_row(strong).await.expect("upsert works");
        let params = engine.recommend_practice_params("u1").await;
        assert_eq!((params.width, params.height), (15, 15));
        assert_eq!(params.difficulty, Difficulty::Hard);
        assert!(params.seed.contains('-'));
    }

    #[tokio::test]
    async fn read_paths_survive_outages() {
        let engine = engine();
        engine.store().set_offline(true).await;
        let level = level_x(Difficulty::Normal);
        let analysis = analyze_level(&level);
        let tuning = engine
            .recommend_tuning("u1", DdaMode::Campaign, &level, &analysis)
            .await;
        assert_eq!(tuning.points_start, 1000.0);
        let params = engine.recommend_practice_params("u1").await;
        assert_eq!((params.width, params.height), (10, 10));
        assert_eq!(
            engine.maze_rating_config().await,
            MazeRatingConfig::default()
        );
    }

    #[tokio::test]
    async fn config_cache_honours_ttl_and_invalidation() {
        static NOW: AtomicU64 = AtomicU64::new(1_000);
        fn clock() -> u64 {
            NOW.load(Ordering::SeqCst)
        }

        let engine = DdaEngine::new(MemoryStore::new(), EngineOptions::default()).with_clock(clock);
        engine
            .store()
            .set_dda_config("maze_rating", json!({ "scale": { "min": 10, "max": 90 } }))
            .await;
        assert_eq!(engine.maze_rating_config().await.scale.max, 90.0);

        engine
            .store()
            .set_dda_config("maze_rating", json!({ "scale": { "min": 10, "max": 70 } }))
            .await;
        NOW.store(60_999, Ordering::SeqCst);
        assert_eq!(engine.maze_rating_config().await.scale.max, 90.0);

        NOW.store(61_000, Ordering::SeqCst);
        assert_eq!(engine.maze_rating_config().await.scale.max, 70.0);

        engine
            .store()
            .set_dda_config("maze_rating", json!({ "weights": { "turns": 5 } }))
            .await;
        engine.invalidate_config_cache().await;
        let config = engine.maze_rating_config().await;
        assert_eq!(config.weights.turns, 5.0);
        assert_eq!(config.scale, MazeRatingConfig::default().scale);
    }

    #[tokio::test]
    async fn skill_window_reads_newest_attempts() {
        let engine = engine();
        for (idx, completed) in [true, true, false].into_iter().enumerate() {
            let ended = format!("2026-03-01T10:0{}:00.000Z", idx + 1);
            engine
                .record_attempt_and_update_skill(&input(DdaMode::Campaign, completed, &ended))
                .await
                .expect("record works");
        }
        let skill = engine
            .get_skill("u1", DdaMode::Campaign, Difficulty::Easy)
            .await
            .expect("skill row exists");
        assert_eq!(skill.sample_count, 3);
        assert_eq!(skill.streak_signed, Some(-1));
    }
}
