use thiserror::Error;

use crate::constants::{get_campaign_level_spec, LEVEL_STAR_THRESHOLDS};
use crate::rng::{RandomSource, Rng};
use crate::types::{Cell, Difficulty, Dir, Grid, Level, PracticeIaParams, Pos, Walls};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MazeError {
    #[error("invalid maze dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LevelParams {
    pub width: i32,
    pub height: i32,
    pub difficulty: Difficulty,
    pub memorize_time: u32,
    pub stars: Vec<i32>,
    pub level_number: u32,
    pub seed: Option<String>,
}

/// Randomized depth-first backtracking over a `width`x`height` grid.
///
/// The carved passages form a spanning tree, so every pair of cells is joined
/// by exactly one simple path. Walls are always removed in matched pairs.
pub fn generate_grid<R: RandomSource>(
    width: i32,
    height: i32,
    rng: &mut R,
) -> Result<Grid, MazeError> {
    if width <= 0 || height <= 0 {
        return Err(MazeError::InvalidDimensions { width, height });
    }

    let mut grid = Grid {
        rows: vec![
            vec![
                Cell {
                    walls: Walls::closed()
                };
                width as usize
            ];
            height as usize
        ],
    };
    let mut visited = vec![vec![false; width as usize]; height as usize];

    let start = Pos::new(0, 0);
    visited[0][0] = true;
    let mut stack = vec![start];

    while let Some(&current) = stack.last() {
        let candidates = unvisited_neighbors(&visited, width, height, current);
        if candidates.is_empty() {
            stack.pop();
            continue;
        }
        let (next, dir) = candidates[rng.pick_index(candidates.len())];
        remove_wall_pair(&mut grid, current, next, dir);
        visited[next.y as usize][next.x as usize] = true;
        stack.push(next);
    }

    Ok(grid)
}

pub fn generate_level(params: &LevelParams) -> Result<Level, MazeError> {
    let mut rng = match params.seed.as_deref() {
        Some(seed) => Rng::from_seed_str(seed),
        None => Rng::from_entropy(),
    };
    generate_level_with(params, &mut rng)
}

pub fn generate_level_with<R: RandomSource>(
    params: &LevelParams,
    rng: &mut R,
) -> Result<Level, MazeError> {
    let maze = generate_grid(params.width, params.height, rng)?;
    Ok(Level {
        id: campaign_level_id(params.difficulty, params.level_number),
        number: params.level_number,
        difficulty: params.difficulty,
        width: params.width,
        height: params.height,
        maze,
        memorize_time: params.memorize_time,
        star_thresholds: params.stars.clone(),
        start: Pos::new(0, 0),
        exit: Pos::new(params.width - 1, params.height - 1),
    })
}

/// Campaign board. Without a seed the maze is derived from the level id, so
/// every request for the same level sees the same structure; a caller seed
/// is folded into the id.
pub fn generate_campaign_level(
    difficulty: Difficulty,
    level_number: u32,
    seed: Option<String>,
) -> Result<Level, MazeError> {
    let spec = get_campaign_level_spec(difficulty, level_number);
    let id = match seed.as_deref() {
        Some(seed) => seeded_campaign_level_id(difficulty, level_number, seed),
        None => campaign_level_id(difficulty, level_number),
    };
    let mut level = generate_level(&LevelParams {
        width: spec.width,
        height: spec.height,
        difficulty,
        memorize_time: spec.memorize_time,
        stars: LEVEL_STAR_THRESHOLDS.to_vec(),
        level_number,
        seed: Some(seed.unwrap_or_else(|| id.clone())),
    })?;
    level.id = id;
    Ok(level)
}

/// Adaptive practice board for the `run`-th level of a session (0-based).
/// The id is derived from the seed so every instance gets its own catalog row.
pub fn generate_practice_ia_level(params: &PracticeIaParams, run: u32) -> Result<Level, MazeError> {
    let mut level = generate_level(&LevelParams {
        width: params.width,
        height: params.height,
        difficulty: params.difficulty,
        memorize_time: params.memorize_time,
        stars: LEVEL_STAR_THRESHOLDS.to_vec(),
        level_number: run.saturating_add(1),
        seed: Some(params.seed.clone()),
    })?;
    level.id = practice_ia_level_id(&params.seed);
    Ok(level)
}

pub fn campaign_level_id(difficulty: Difficulty, level_number: u32) -> String {
    format!("{}-level-{}", difficulty.as_str(), level_number)
}

pub fn seeded_campaign_level_id(difficulty: Difficulty, level_number: u32, seed: &str) -> String {
    format!("{}-{seed}", campaign_level_id(difficulty, level_number))
}

pub fn practice_normal_level_id(level_index: u32, seed: Option<&str>) -> String {
    match seed {
        Some(seed) => format!("practice-normal-{level_index}-{seed}"),
        None => format!("practice-normal-{level_index}"),
    }
}

pub fn practice_ia_level_id(seed: &str) -> String {
    format!("practice-ia-{seed}")
}

fn unvisited_neighbors(
    visited: &[Vec<bool>],
    width: i32,
    height: i32,
    pos: Pos,
) -> Vec<(Pos, Dir)> {
    let mut out = Vec::with_capacity(4);
    for dir in Dir::ALL {
        let (dx, dy) = dir.delta();
        let (nx, ny) = (pos.x + dx, pos.y + dy);
        if nx < 0 || ny < 0 || nx >= width || ny >= height {
            continue;
        }
        if !visited[ny as usize][nx as usize] {
            out.push((Pos::new(nx, ny), dir));
        }
    }
    out
}

fn remove_wall_pair(grid: &mut Grid, from: Pos, to: Pos, dir: Dir) {
    if let Some(cell) = grid.cell_mut(from) {
        cell.walls.set(dir, false);
    }
    if let Some(cell) = grid.cell_mut(to) {
        cell.walls.set(dir.opposite(), false);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use super::*;

    fn open_edge_count(grid: &Grid) -> usize {
        let mut edges = 0;
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let cell = grid.cell(Pos::new(x, y)).expect("cell in range");
                if x + 1 < grid.width() && !cell.walls.right {
                    edges += 1;
                }
                if y + 1 < grid.height() && !cell.walls.bottom {
                    edges += 1;
                }
            }
        }
        edges
    }

    fn reachable_cells(grid: &Grid) -> HashSet<Pos> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(Pos::new(0, 0));
        queue.push_back(Pos::new(0, 0));
        while let Some(pos) = queue.pop_front() {
            let cell = grid.cell(pos).expect("cell in range");
            for dir in Dir::ALL {
                if cell.walls.get(dir) {
                    continue;
                }
                let (dx, dy) = dir.delta();
                let next = Pos::new(pos.x + dx, pos.y + dy);
                if grid.contains(next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    #[test]
    fn generated_mazes_are_spanning_trees() {
        for seed in 0..200u32 {
            let mut rng = Rng::new(seed);
            let width = 1 + (seed % 9) as i32;
            let height = 1 + (seed % 7) as i32;
            let grid = generate_grid(width, height, &mut rng).expect("valid dimensions");
            let total = (width * height) as usize;
            assert_eq!(open_edge_count(&grid), total - 1, "seed={seed}");
            assert_eq!(reachable_cells(&grid).len(), total, "seed={seed}");
        }
    }

    #[test]
    fn walls_are_symmetric_between_neighbors() {
        for seed in 0..100u32 {
            let grid = generate_grid(8, 6, &mut Rng::new(seed)).expect("valid dimensions");
            for y in 0..grid.height() {
                for x in 0..grid.width() {
                    let pos = Pos::new(x, y);
                    let cell = grid.cell(pos).expect("cell in range");
                    for dir in Dir::ALL {
                        let (dx, dy) = dir.delta();
                        let Some(other) = grid.cell(Pos::new(x + dx, y + dy)) else {
                            assert!(cell.walls.get(dir), "outer wall open at {pos:?}");
                            continue;
                        };
                        assert_eq!(cell.walls.get(dir), other.walls.get(dir.opposite()));
                    }
                }
            }
        }
    }

    #[test]
    fn single_row_degenerates_to_corridor() {
        let grid = generate_grid(6, 1, &mut Rng::new(3)).expect("valid dimensions");
        for x in 0..5 {
            let cell = grid.cell(Pos::new(x, 0)).expect("cell in range");
            assert!(!cell.walls.right);
        }
        let single = generate_grid(1, 1, &mut Rng::new(3)).expect("valid dimensions");
        assert_eq!(single.rows[0][0].walls, Walls::closed());
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        let mut rng = Rng::new(1);
        assert_eq!(
            generate_grid(0, 5, &mut rng),
            Err(MazeError::InvalidDimensions {
                width: 0,
                height: 5
            })
        );
        assert!(generate_grid(4, -1, &mut rng).is_err());
    }

    #[test]
    fn seeded_levels_are_reproducible() {
        let params = LevelParams {
            width: 7,
            height: 7,
            difficulty: Difficulty::Easy,
            memorize_time: 10,
            stars: vec![60, 45, 30],
            level_number: 1,
            seed: Some("X".to_string()),
        };
        let a = generate_level(&params).expect("level generates");
        let b = generate_level(&params).expect("level generates");
        assert_eq!(a.maze, b.maze);
        assert_eq!(a.id, "easy-level-1");
        assert_eq!(a.start, Pos::new(0, 0));
        assert_eq!(a.exit, Pos::new(6, 6));

        let differs = (0..20).any(|idx| {
            let other = generate_level(&LevelParams {
                seed: Some(format!("Y{idx}")),
                ..params.clone()
            })
            .expect("level generates");
            other.maze != a.maze
        });
        assert!(differs);
    }

    #[test]
    fn practice_ia_levels_are_keyed_by_seed() {
        let params = PracticeIaParams {
            width: 9,
            height: 9,
            memorize_time: 14,
            difficulty: Difficulty::Hard,
            seed: "m1x-ab12cd".to_string(),
        };
        let level = generate_practice_ia_level(&params, 2).expect("level generates");
        assert_eq!(level.id, "practice-ia-m1x-ab12cd");
        assert_eq!(level.number, 3);
        assert_eq!(level.exit, Pos::new(8, 8));
        assert_eq!(level.maze, generate_practice_ia_level(&params, 0).expect("level generates").maze);

        let campaign = generate_campaign_level(Difficulty::Normal, 4, None).expect("level generates");
        assert_eq!(campaign.id, "normal-level-4");
        assert_eq!((campaign.width, campaign.height, campaign.memorize_time), (7, 7, 10));
        assert_eq!(campaign.star_thresholds, vec![60, 45, 30]);
    }

    #[test]
    fn level_ids_follow_join_key_scheme() {
        assert_eq!(campaign_level_id(Difficulty::Hard, 12), "hard-level-12");
        assert_eq!(practice_ia_level_id("m1x-ab12cd"), "practice-ia-m1x-ab12cd");
        assert_eq!(seeded_campaign_level_id(Difficulty::Easy, 1, "X"), "easy-level-1-X");
        assert_eq!(practice_normal_level_id(5, None), "practice-normal-5");
        assert_eq!(practice_normal_level_id(5, Some("s")), "practice-normal-5-s");
    }

    #[test]
    fn campaign_level_id_always_names_the_same_maze() {
        let a = generate_campaign_level(Difficulty::Easy, 1, None).expect("level generates");
        let b = generate_campaign_level(Difficulty::Easy, 1, None).expect("level generates");
        assert_eq!(a.id, "easy-level-1");
        assert_eq!(a.id, b.id);
        assert_eq!(a.maze, b.maze);

        let seeded = generate_campaign_level(Difficulty::Easy, 1, Some("other".to_string()))
            .expect("level generates");
        assert_eq!(seeded.id, "easy-level-1-other");
        let again = generate_campaign_level(Difficulty::Easy, 1, Some("other".to_string()))
            .expect("level generates");
        assert_eq!(seeded.maze, again.maze);

        let next = generate_campaign_level(Difficulty::Easy, 2, None).expect("level generates");
        assert_ne!(next.id, a.id);
    }
}
