use serde::Serialize;

use crate::types::DdaTuning;

/// Point economy for one play session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRules {
    pub points_start: f64,
    pub loss_per_second: f64,
    pub loss_path_help_per_second: f64,
    pub loss_per_crash_help: f64,
    pub reveal_cost: f64,
    pub reveal_charges: u32,
}

impl From<&DdaTuning> for ScoreRules {
    fn from(tuning: &DdaTuning) -> Self {
        Self {
            points_start: tuning.points_start,
            loss_per_second: tuning.points_loss_per_second,
            loss_path_help_per_second: tuning.points_loss_path_help,
            loss_per_crash_help: tuning.points_loss_crash_help,
            reveal_cost: tuning.points_cost_reveal,
            reveal_charges: tuning.reveal_charges,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreLedger {
    rules: ScoreRules,
    points: f64,
    reveal_charges: u32,
    reveal_used: u32,
    crash_help_used: u32,
    path_help_seconds: f64,
}

impl ScoreLedger {
    pub fn new(rules: ScoreRules) -> Self {
        Self {
            rules,
            points: rules.points_start.max(0.0),
            reveal_charges: rules.reveal_charges,
            reveal_used: 0,
            crash_help_used: 0,
            path_help_seconds: 0.0,
        }
    }

    pub fn from_tuning(tuning: &DdaTuning) -> Self {
        Self::new(ScoreRules::from(tuning))
    }

    pub fn points(&self) -> f64 {
        self.points
    }

    /// Whole points as shown to the player.
    pub fn display_points(&self) -> i32 {
        self.points.floor() as i32
    }

    pub fn reveal_charges(&self) -> u32 {
        self.reveal_charges
    }

    pub fn reveal_used(&self) -> u32 {
        self.reveal_used
    }

    pub fn crash_help_used(&self) -> u32 {
        self.crash_help_used
    }

    pub fn path_help_seconds(&self) -> f64 {
        self.path_help_seconds
    }

    pub fn tick(&mut self, seconds: f64, path_help_active: bool) {
        if !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        let mut loss = self.rules.loss_per_second;
        if path_help_active {
            loss += self.rules.loss_path_help_per_second;
            self.path_help_seconds += seconds;
        }
        self.deduct(loss * seconds);
    }

    /// Spends a reveal charge. Returns `false` when none are left.
    pub fn use_reveal(&mut self) -> bool {
        if self.reveal_charges == 0 {
            return false;
        }
        self.reveal_charges -= 1;
        self.reveal_used += 1;
        self.deduct(self.rules.reveal_cost);
        true
    }

    pub fn use_crash_help(&mut self) {
        self.crash_help_used += 1;
        self.deduct(self.rules.loss_per_crash_help);
    }

    fn deduct(&mut self, amount: f64) {
        self.points = (self.points - amount).max(0.0);
    }
}

/// Number of thresholds met; `thresholds` run from the three-star mark down.
pub fn stars_for_points(points: f64, thresholds: &[i32]) -> u32 {
    if !points.is_finite() || points <= 0.0 {
        return 0;
    }
    thresholds
        .iter()
        .filter(|threshold| points >= **threshold as f64)
        .count() as u32
}
