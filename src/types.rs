use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Normal, Difficulty::Hard];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Self::Easy),
            "normal" => Some(Self::Normal),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Normal => "normal",
            Self::Hard => "hard",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdaMode {
    Campaign,
    PracticeIa,
    PracticeFree,
    PracticeNormal,
    Other,
}

impl DdaMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "campaign" => Some(Self::Campaign),
            "practice_ia" => Some(Self::PracticeIa),
            "practice_free" => Some(Self::PracticeFree),
            "practice_normal" => Some(Self::PracticeNormal),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::PracticeIa => "practice_ia",
            Self::PracticeFree => "practice_free",
            Self::PracticeNormal => "practice_normal",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    Top,
    Right,
    Bottom,
    Left,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::Top, Dir::Right, Dir::Bottom, Dir::Left];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::Top => (0, -1),
            Dir::Right => (1, 0),
            Dir::Bottom => (0, 1),
            Dir::Left => (-1, 0),
        }
    }

    pub fn opposite(self) -> Dir {
        match self {
            Dir::Top => Dir::Bottom,
            Dir::Right => Dir::Left,
            Dir::Bottom => Dir::Top,
            Dir::Left => Dir::Right,
        }
    }

    pub fn between(from: Pos, to: Pos) -> Option<Dir> {
        match (to.x - from.x, to.y - from.y) {
            (0, -1) => Some(Dir::Top),
            (1, 0) => Some(Dir::Right),
            (0, 1) => Some(Dir::Bottom),
            (-1, 0) => Some(Dir::Left),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walls {
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
    pub left: bool,
}

impl Walls {
    pub fn closed() -> Self {
        Self {
            top: true,
            right: true,
            bottom: true,
            left: true,
        }
    }

    pub fn get(&self, dir: Dir) -> bool {
        match dir {
            Dir::Top => self.top,
            Dir::Right => self.right,
            Dir::Bottom => self.bottom,
            Dir::Left => self.left,
        }
    }

    pub fn set(&mut self, dir: Dir, present: bool) {
        match dir {
            Dir::Top => self.top = present,
            Dir::Right => self.right = present,
            Dir::Bottom => self.bottom = present,
            Dir::Left => self.left = present,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub walls: Walls,
}

/// Row-major cell matrix: `rows[y][x]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    pub rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn width(&self) -> i32 {
        self.rows.first().map(|row| row.len() as i32).unwrap_or(0)
    }

    pub fn height(&self) -> i32 {
        self.rows.len() as i32
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width() && pos.y < self.height()
    }

    pub fn cell(&self, pos: Pos) -> Option<&Cell> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        self.rows
            .get(pos.y as usize)
            .and_then(|row| row.get(pos.x as usize))
    }

    pub fn cell_mut(&mut self, pos: Pos) -> Option<&mut Cell> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        self.rows
            .get_mut(pos.y as usize)
            .and_then(|row| row.get_mut(pos.x as usize))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub id: String,
    pub number: u32,
    pub difficulty: Difficulty,
    pub width: i32,
    pub height: i32,
    pub maze: Grid,
    #[serde(rename = "memorizeTime")]
    pub memorize_time: u32,
    #[serde(rename = "starThresholds")]
    pub star_thresholds: Vec<i32>,
    pub start: Pos,
    pub exit: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MazeAnalysis {
    pub width: i32,
    pub height: i32,
    #[serde(rename = "totalCells")]
    pub total_cells: u32,
    pub intersections: u32,
    #[serde(rename = "intersectionDensity")]
    pub intersection_density: f64,
    #[serde(rename = "deadEnds")]
    pub dead_ends: u32,
    #[serde(rename = "optimalPathLength")]
    pub optimal_path_length: u32,
    #[serde(rename = "optimalPathTurns")]
    pub optimal_path_turns: u32,
    #[serde(rename = "pathCells")]
    pub path_cells: Vec<Pos>,
}

/// What the play session reports when it ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetrics {
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "endedAt")]
    pub ended_at: String,
    pub completed: bool,
    #[serde(rename = "failReason")]
    pub fail_reason: Option<String>,
    #[serde(rename = "timeSeconds")]
    pub time_seconds: f64,
    #[serde(rename = "pointsFinal")]
    pub points_final: f64,
    pub stars: u32,
    pub moves: u32,
    pub crashes: u32,
    pub revisits: u32,
    #[serde(rename = "revealUsed")]
    pub reveal_used: u32,
    #[serde(rename = "pathHelpSeconds")]
    pub path_help_seconds: f64,
    #[serde(rename = "crashHelpUsed")]
    pub crash_help_used: u32,
    #[serde(rename = "skippedMemorize")]
    pub skipped_memorize: bool,
    #[serde(rename = "memorizeTime")]
    pub memorize_time: u32,
}

/// One row of the append-only attempt log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptRow {
    pub user_id: String,
    pub mode: DdaMode,
    pub level_id: String,
    pub difficulty: Difficulty,
    pub level_number: u32,
    pub width: i32,
    pub height: i32,
    pub memorize_time: u32,
    pub started_at: String,
    pub ended_at: String,
    pub completed: bool,
    pub fail_reason: Option<String>,
    pub time_seconds: f64,
    pub points_final: f64,
    pub stars: u32,
    pub moves: u32,
    pub crashes: u32,
    pub revisits: u32,
    pub reveal_used: u32,
    pub path_help_seconds: f64,
    pub crash_help_used: u32,
    pub skipped_memorize: bool,
    pub optimal_path_len: u32,
    pub optimal_turns: u32,
    pub maze_rating: f64,
    #[serde(default)]
    pub settings_snapshot: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelCatalogEntry {
    pub level_id: String,
    pub difficulty: Difficulty,
    pub level_number: u32,
    pub width: i32,
    pub height: i32,
    pub memorize_time_default: u32,
    pub optimal_path_len: u32,
    pub optimal_turns: u32,
    pub intersection_density: f64,
    pub dead_ends: u32,
    pub maze_rating: f64,
    pub analysis_json: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSkillRow {
    pub user_id: String,
    pub mode: DdaMode,
    pub difficulty: Difficulty,
    pub skill_mu: f64,
    pub skill_sigma: f64,
    pub sample_count: u32,
    pub last_success_rate: Option<f64>,
    pub last_efficiency: Option<f64>,
    pub last_crash_rate: Option<f64>,
    pub last_help_rate: Option<f64>,
    pub last_time_per_step: Option<f64>,
    pub last_maze_rating: Option<f64>,
    pub streak_signed: Option<i32>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DdaTuning {
    #[serde(rename = "memorizeTime")]
    pub memorize_time: u32,
    #[serde(rename = "revealCharges")]
    pub reveal_charges: u32,
    #[serde(rename = "pointsStart")]
    pub points_start: f64,
    #[serde(rename = "pointsLossPerSecond")]
    pub points_loss_per_second: f64,
    #[serde(rename = "pointsLossPathHelp")]
    pub points_loss_path_help: f64,
    #[serde(rename = "pointsLossCrashHelp")]
    pub points_loss_crash_help: f64,
    #[serde(rename = "pointsCostReveal")]
    pub points_cost_reveal: f64,
    #[serde(rename = "starThresholds")]
    pub star_thresholds: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PracticeIaParams {
    pub width: i32,
    pub height: i32,
    #[serde(rename = "memorizeTime")]
    pub memorize_time: u32,
    pub difficulty: Difficulty,
    pub seed: String,
}

#[derive(Clone, Debug)]
pub struct RecordAttemptInput {
    pub user_id: String,
    pub mode: DdaMode,
    pub level: Level,
    pub analysis: MazeAnalysis,
    pub attempt: AttemptMetrics,
    pub settings_snapshot: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_and_mode_round_trip_their_names() {
        for difficulty in Difficulty::ALL {
            assert_eq!(Difficulty::parse(difficulty.as_str()), Some(difficulty));
        }
        assert_eq!(DdaMode::parse("practice_ia"), Some(DdaMode::PracticeIa));
        assert_eq!(DdaMode::parse("PRACTICE_IA"), None);
        assert_eq!(
            serde_json::to_value(DdaMode::PracticeNormal).expect("mode serializes"),
            serde_json::json!("practice_normal")
        );
    }

    #[test]
    fn dir_between_only_accepts_unit_steps() {
        let origin = Pos::new(2, 2);
        assert_eq!(Dir::between(origin, Pos::new(2, 1)), Some(Dir::Top));
        assert_eq!(Dir::between(origin, Pos::new(1, 2)), Some(Dir::Left));
        assert_eq!(Dir::between(origin, Pos::new(3, 3)), None);
        assert_eq!(Dir::between(origin, origin), None);
        for dir in Dir::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
        }
    }

    #[test]
    fn grid_lookup_rejects_out_of_bounds() {
        let grid = Grid {
            rows: vec![vec![Cell { walls: Walls::closed() }; 3]; 2],
        };
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert!(grid.cell(Pos::new(2, 1)).is_some());
        assert!(grid.cell(Pos::new(3, 0)).is_none());
        assert!(grid.cell(Pos::new(-1, 0)).is_none());
        assert!(!grid.contains(Pos::new(0, 2)));
    }
}
