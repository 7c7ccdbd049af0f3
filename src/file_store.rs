use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::{DdaStore, StoreResult, StoreState};
use crate::types::{AttemptRow, DdaMode, Difficulty, LevelCatalogEntry, UserSkillRow};

const STORE_VERSION: u8 = 1;

#[derive(Serialize)]
struct StoreFile<'a> {
    version: u8,
    #[serde(flatten)]
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct StoreFileRaw {
    version: u8,
    #[serde(default)]
    attempts: Vec<Value>,
    #[serde(default)]
    skills: Vec<Value>,
    #[serde(default)]
    catalog: BTreeMap<String, Value>,
    #[serde(default)]
    config: BTreeMap<String, Value>,
}

/// JSON document store. The whole document is rewritten after every write.
pub struct FileStore {
    file_path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    pub fn new(file_path: PathBuf) -> Self {
        let state = load_state(&file_path);
        Self {
            file_path,
            state: Mutex::new(state),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub async fn set_dda_config(&self, id: &str, value: Value) -> StoreResult<()> {
        self.commit(|state| state.set_dda_config(id, value)).await
    }

    /// Applies `change` to a copy and swaps it in only once it is on disk.
    async fn commit(&self, change: impl FnOnce(&mut StoreState)) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next);
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    fn save(&self, state: &StoreState) -> StoreResult<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = StoreFile {
            version: STORE_VERSION,
            state,
        };
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.file_path, text)?;
        Ok(())
    }
}

impl DdaStore for FileStore {
    async fn select_recent_attempts(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
        limit: usize,
    ) -> StoreResult<Vec<AttemptRow>> {
        let state = self.state.lock().await;
        Ok(state.recent_attempts(user_id, mode, difficulty, limit))
    }

    async fn insert_attempt(&self, row: AttemptRow) -> StoreResult<()> {
        self.commit(|state| state.insert_attempt(row)).await
    }

    async fn upsert_skill_row(&self, row: UserSkillRow) -> StoreResult<()> {
        self.commit(|state| state.upsert_skill_row(row)).await
    }

    async fn select_skill_row(
        &self,
        user_id: &str,
        mode: DdaMode,
        difficulty: Difficulty,
    ) -> StoreResult<Option<UserSkillRow>> {
        let state = self.state.lock().await;
        Ok(state.skill_row(user_id, mode, difficulty))
    }

    async fn select_skill_rows(
        &self,
        user_id: &str,
        mode: DdaMode,
    ) -> StoreResult<Vec<UserSkillRow>> {
        let state = self.state.lock().await;
        Ok(state.skill_rows(user_id, mode))
    }

    async fn upsert_level_catalog_entry(&self, entry: LevelCatalogEntry) -> StoreResult<()> {
        self.commit(|state| state.upsert_catalog_entry(entry)).await
    }

    async fn select_dda_config(&self, id: &str) -> StoreResult<Option<Value>> {
        let state = self.state.lock().await;
        Ok(state.dda_config(id))
    }
}

fn load_state(path: &Path) -> StoreState {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!("[file-store] failed to read {}: {error}", path.display());
            }
            return StoreState::default();
        }
    };
    let parsed = match serde_json::from_str::<StoreFileRaw>(&text) {
        Ok(value) if value.version == STORE_VERSION => value,
        Ok(value) => {
            warn!(
                "[file-store] unsupported version {} at {}",
                value.version,
                path.display()
            );
            return StoreState::default();
        }
        Err(error) => {
            warn!("[file-store] failed to parse {}: {error}", path.display());
            return StoreState::default();
        }
    };

    let mut state = StoreState::default();
    for (idx, raw) in parsed.attempts.into_iter().enumerate() {
        match serde_json::from_value::<AttemptRow>(raw) {
            Ok(row) if is_valid_attempt(&row) => state.insert_attempt(row),
            Ok(_) => warn!("[file-store] dropping invalid attempt #{idx} in {}", path.display()),
            Err(error) => warn!(
                "[file-store] failed to parse attempt #{idx} in {}: {error}",
                path.display()
            ),
        }
    }
    for (idx, raw) in parsed.skills.into_iter().enumerate() {
        match serde_json::from_value::<UserSkillRow>(raw) {
            Ok(row) if !row.user_id.trim().is_empty() => state.upsert_skill_row(row),
            Ok(_) => warn!("[file-store] dropping skill row #{idx} without user in {}", path.display()),
            Err(error) => warn!(
                "[file-store] failed to parse skill row #{idx} in {}: {error}",
                path.display()
            ),
        }
    }
    for (level_id, raw) in parsed.catalog {
        match serde_json::from_value::<LevelCatalogEntry>(raw) {
            Ok(entry) if entry.level_id == level_id => state.upsert_catalog_entry(entry),
            Ok(entry) => warn!(
                "[file-store] catalog key '{level_id}' does not match entry '{}'",
                entry.level_id
            ),
            Err(error) => warn!(
                "[file-store] failed to parse catalog entry '{level_id}' in {}: {error}",
                path.display()
            ),
        }
    }
    state.config = parsed.config;
    state
}

fn is_valid_attempt(row: &AttemptRow) -> bool {
    !row.user_id.trim().is_empty()
        && row.time_seconds.is_finite()
        && row.time_seconds >= 0.0
        && row.points_final.is_finite()
        && row.maze_rating.is_finite()
}
