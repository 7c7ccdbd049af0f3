use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::types::{Dir, Grid, Level, MazeAnalysis, Pos};

/// Cells reachable in one step from `pos`.
///
/// A passage counts only when both cells agree the shared wall is open;
/// disagreement is treated as a closed wall.
pub fn open_neighbors(grid: &Grid, pos: Pos) -> Vec<Pos> {
    let Some(cell) = grid.cell(pos) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(4);
    for dir in Dir::ALL {
        let (dx, dy) = dir.delta();
        let next = Pos::new(pos.x + dx, pos.y + dy);
        let Some(other) = grid.cell(next) else {
            continue;
        };
        let here_open = !cell.walls.get(dir);
        let there_open = !other.walls.get(dir.opposite());
        if here_open && there_open {
            out.push(next);
        } else if here_open != there_open && cfg!(debug_assertions) {
            warn!(
                "[maze-stats] wall mismatch between ({},{}) and ({},{})",
                pos.x, pos.y, next.x, next.y
            );
        }
    }
    out
}

/// Breadth-first shortest path from `start` to `goal`, both inclusive.
///
/// Returns `None` when either end lies outside the grid or `goal` is not
/// reachable.
pub fn shortest_path(grid: &Grid, start: Pos, goal: Pos) -> Option<Vec<Pos>> {
    if !grid.contains(start) || !grid.contains(goal) {
        return None;
    }

    let mut prev: HashMap<Pos, Pos> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    prev.insert(start, start);

    while let Some(current) = queue.pop_front() {
        if current == goal {
            break;
        }
        for next in open_neighbors(grid, current) {
            if prev.contains_key(&next) {
                continue;
            }
            prev.insert(next, current);
            queue.push_back(next);
        }
    }

    if !prev.contains_key(&goal) {
        return None;
    }

    let mut path = vec![goal];
    let mut cursor = goal;
    while cursor != start {
        cursor = *prev.get(&cursor)?;
        path.push(cursor);
    }
    path.reverse();
    Some(path)
}

pub fn count_turns(path: &[Pos]) -> u32 {
    turn_positions(path).len() as u32
}

/// Cells at which the direction of travel changes.
pub fn turn_positions(path: &[Pos]) -> Vec<Pos> {
    let mut turns = Vec::new();
    if path.len() < 3 {
        return turns;
    }
    let mut prev = (path[1].x - path[0].x, path[1].y - path[0].y);
    for idx in 2..path.len() {
        let step = (path[idx].x - path[idx - 1].x, path[idx].y - path[idx - 1].y);
        if step != prev {
            turns.push(path[idx - 1]);
            prev = step;
        }
    }
    turns
}

pub fn analyze_level(level: &Level) -> MazeAnalysis {
    analyze_grid(&level.maze, level.start, level.exit)
}

pub fn analyze_grid(grid: &Grid, start: Pos, exit: Pos) -> MazeAnalysis {
    let width = grid.width();
    let height = grid.height();
    let total_cells = (width.max(0) * height.max(0)) as u32;

    let mut intersections = 0u32;
    let mut dead_ends = 0u32;
    for y in 0..height {
        for x in 0..width {
            let degree = open_neighbors(grid, Pos::new(x, y)).len();
            if degree >= 3 {
                intersections += 1;
            }
            if degree == 1 {
                dead_ends += 1;
            }
        }
    }

    let path_cells = match shortest_path(grid, start, exit) {
        Some(path) => path,
        None => {
            warn!(
                "[maze-stats] exit ({},{}) unreachable from ({},{}); reporting empty path",
                exit.x, exit.y, start.x, start.y
            );
            vec![start]
        }
    };
    let optimal_path_length = path_cells.len().saturating_sub(1) as u32;
    let optimal_path_turns = count_turns(&path_cells);

    MazeAnalysis {
        width,
        height,
        total_cells,
        intersections,
        intersection_density: if total_cells == 0 {
            0.0
        } else {
            intersections as f64 / total_cells as f64
        },
        dead_ends,
        optimal_path_length,
        optimal_path_turns,
        path_cells,
    }
}
