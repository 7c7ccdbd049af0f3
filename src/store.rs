use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{AttemptRow, DdaMode, Difficulty, LevelCatalogEntry, UserSkillRow};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Attempts,
    UserSkill,
    LevelCatalog,
    DdaConfig,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Attempts => "dda_attempts",
            Table::UserSkill => "user_skill",
            Table::LevelCatalog => "level_catalog",
            Table::DdaConfig => "dda_config",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing table has not been created yet.
    #[error("relation \"{}\" does not exist", table.as_str())]
    MissingRelation { table: Table },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, StoreError::MissingRelation { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator for attempts, skill rows, the level catalog and
/// remote tuning config.
pub trait DdaStore: Send + Sync {
    /// Newest first, at most `limit` rows.
    fn select_recent_attempts(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
        limit: usize,
    ) -> impl Future<Output = StoreResult<Vec<AttemptRow>>> + Send;

    fn insert_attempt(&self, row: AttemptRow) -> impl Future<Output = StoreResult<()>> + Send;

    /// Keyed by `(user_id, mode, difficulty)`; last write wins.
    fn upsert_skill_row(&self, row: UserSkillRow) -> impl Future<Output = StoreResult<()>> + Send;

    fn select_skill_row(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> impl Future<Output = StoreResult<Option<UserSkillRow>>> + Send;

    fn select_skill_rows(
        &self,
        user_id: &str,
        mode: DdaMode,
    ) -> impl Future<Output = StoreResult<Vec<UserSkillRow>>> + Send;

    fn upsert_level_catalog_entry(
        &self,
        entry: LevelCatalogEntry,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn select_dda_config(&self, id: &str) -> impl Future<Output = StoreResult<Option<Value>>> + Send;
}

/// Table contents shared by the in-memory and file-backed stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub attempts: Vec<AttemptRow>,
    pub skills: Vec<UserSkillRow>,
    pub catalog: BTreeMap<String, LevelCatalogEntry>,
    pub config: BTreeMap<String, Value>,
}

impl StoreState {
    pub fn recent_attempts(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
        limit: usize,
    ) -> Vec<AttemptRow> {
        let mut matching: Vec<(Option<i64>, usize, &AttemptRow)> = self
            .attempts
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.user_id == user_id && row.mode == mode && row.difficulty == difficulty
            })
            .map(|(idx, row)| (parse_timestamp_ms(&row.ended_at), idx, row))
            .collect();
        // Unparseable timestamps sort after every dated row.
        matching.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        matching
            .into_iter()
            .take(limit)
            .map(|(_, _, row)| row.clone())
            .collect()
    }

    pub fn insert_attempt(&mut self, row: AttemptRow) {
        self.attempts.push(row);
    }

    pub fn upsert_skill_row(&mut self, row: UserSkillRow) {
        match self.skills.iter_mut().find(|current| {
            current.user_id == row.user_id
                && current.mode == row.mode
                && current.difficulty == row.difficulty
        }) {
            Some(current) => *current = row,
            None => self.skills.push(row),
        }
    }

    pub fn skill_row(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> Option<UserSkillRow> {
        self.skills
            .iter()
            .find(|row| row.user_id == user_id && row.mode == mode && row.difficulty == difficulty)
            .cloned()
    }

    pub fn skill_rows(&self, user_id: &str, mode: DdaMode) -> Vec<UserSkillRow> {
        let mut rows: Vec<UserSkillRow> = self
            .skills
            .iter()
            .filter(|row| row.user_id == user_id && row.mode == mode)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.difficulty);
        rows
    }

    pub fn upsert_catalog_entry(&mut self, entry: LevelCatalogEntry) {
        self.catalog.insert(entry.level_id.clone(), entry);
    }

    pub fn dda_config(&self, id: &str) -> Option<Value> {
        self.config.get(id).cloned()
    }

    pub fn set_dda_config(&mut self, id: &str, value: Value) {
        self.config.insert(id.to_string(), value);
    }
}

pub fn parse_timestamp_ms(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: StoreState,
    missing: HashSet<Table>,
    offline: bool,
}

impl MemoryInner {
    fn check(&self, table: Table) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Unavailable("backend offline".to_string()));
        }
        if self.missing.contains(&table) {
            return Err(StoreError::MissingRelation { table });
        }
        Ok(())
    }
}

/// Process-local store. Tables can be dropped or the whole backend taken
/// offline to exercise the recovery paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                state,
                ..MemoryInner::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> StoreState {
        self.inner.lock().await.state.clone()
    }

    pub async fn set_dda_config(&self, id: &str, value: Value) {
        self.inner.lock().await.state.set_dda_config(id, value);
    }

    pub async fn drop_table(&self, table: Table) {
        self.inner.lock().await.missing.insert(table);
    }

    pub async fn restore_table(&self, table: Table) {
        self.inner.lock().await.missing.remove(&table);
    }

    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }
}

impl DdaStore for MemoryStore {
    async fn select_recent_attempts(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
        limit: usize,
    ) -> StoreResult<Vec<AttemptRow>> {
        let inner = self.inner.lock().await;
        inner.check(Table::Attempts)?;
        Ok(inner.state.recent_attempts(user_id, mode, difficulty, limit))
    }

    async fn insert_attempt(&self, row: AttemptRow) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Table::Attempts)?;
        inner.state.insert_attempt(row);
        Ok(())
    }

    async fn upsert_skill_row(&self, row: UserSkillRow) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Table::UserSkill)?;
        inner.state.upsert_skill_row(row);
        Ok(())
    }

    async fn select_skill_row(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> StoreResult<Option<UserSkillRow>> {
        let inner = self.inner.lock().await;
        inner.check(Table::UserSkill)?;
        Ok(inner.state.skill_row(user_id, mode, difficulty))
    }

    async fn select_skill_rows(
        &self,
        user_id: &str,
        mode: DdaMode,
    ) -> StoreResult<Vec<UserSkillRow>> {
        let inner = self.inner.lock().await;
        inner.check(Table::UserSkill)?;
        Ok(inner.state.skill_rows(user_id, mode))
    }

    async fn upsert_level_catalog_entry(&self, entry: LevelCatalogEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Table::LevelCatalog)?;
        inner.state.upsert_catalog_entry(entry);
        Ok(())
    }

    async fn select_dda_config(&self, id: &str) -> StoreResult<Option<Value>> {
        let inner = self.inner.lock().await;
        inner.check(Table::DdaConfig)?;
        Ok(inner.state.dda_config(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::neutral_skill_row;
    use crate::skill::tests::attempt;

    fn ended_at(row: AttemptRow, ended_at: &str) -> AttemptRow {
        AttemptRow {
            ended_at: ended_at.to_string(),
            ..row
        }
    }

    #[test]
    fn recent_attempts_are_newest_first_and_limited() {
        let mut state = StoreState::default();
        state.insert_attempt(ended_at(attempt(true), "2026-01-01T00:02:00Z"));
        state.insert_attempt(ended_at(attempt(false), "2026-01-01T00:05:00Z"));
        state.insert_attempt(ended_at(attempt(true), "2026-01-01T00:01:00+00:00"));
        state.insert_attempt(AttemptRow {
            difficulty: Difficulty::Hard,
            ..attempt(true)
        });

        let rows = state.recent_attempts("u1", DdaMode::Campaign, Difficulty::Easy, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ended_at, "2026-01-01T00:05:00Z");
        assert_eq!(rows[1].ended_at, "2026-01-01T00:02:00Z");

        let other_user = state.recent_attempts("u2", DdaMode::Campaign, Difficulty::Easy, 10);
        assert!(other_user.is_empty());
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let mut state = StoreState::default();
        state.insert_attempt(attempt(false));
        state.insert_attempt(attempt(true));
        let rows = state.recent_attempts("u1", DdaMode::Campaign, Difficulty::Easy, 10);
        assert!(rows[0].completed);
        assert!(!rows[1].completed);
    }

    #[test]
    fn skill_rows_upsert_by_key() {
        let mut state = StoreState::default();
        state.upsert_skill_row(neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Hard));
        state.upsert_skill_row(neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Easy));
        let mut updated = neutral_skill_row("u1", DdaMode::Campaign, Difficulty::Hard);
        updated.skill_mu = 0.9;
        state.upsert_skill_row(updated);

        let rows = state.skill_rows("u1", DdaMode::Campaign);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].difficulty, Difficulty::Easy);
        assert_eq!(rows[1].skill_mu, 0.9);
        assert!(state
            .skill_row("u1", DdaMode::PracticeIa, Difficulty::Hard)
            .is_none());
    }

    #[tokio::test]
    async fn memory_store_reports_missing_tables_and_outages() {
        let store = MemoryStore::new();
        store.insert_attempt(attempt(true)).await.expect("insert works");

        store.drop_table(Table::UserSkill).await;
        let error = store
            .select_skill_rows("u1", DdaMode::Campaign)
            .await
            .expect_err("table is missing");
        assert!(error.is_missing_relation());
        assert_eq!(error.to_string(), "relation \"user_skill\" does not exist");
        store.restore_table(Table::UserSkill).await;
        assert!(store.select_skill_rows("u1", DdaMode::Campaign).await.is_ok());

        store.set_offline(true).await;
        let error = store
            .insert_attempt(attempt(false))
            .await
            .expect_err("backend is offline");
        assert!(!error.is_missing_relation());
        store.set_offline(false).await;
        assert_eq!(store.snapshot().await.attempts.len(), 1);
    }
}
