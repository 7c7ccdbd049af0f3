use chrono::{DateTime, SecondsFormat};
use clap::Parser;
use maze_mind_server::constants::CAMPAIGN_LEVELS_PER_DIFFICULTY;
use maze_mind_server::engine::{DdaEngine, EngineOptions};
use maze_mind_server::maze::{generate_campaign_level, generate_practice_ia_level, MazeError};
use maze_mind_server::maze_stats::{analyze_level, open_neighbors};
use maze_mind_server::rating::normalize_rating;
use maze_mind_server::rng::{now_ms, RandomSource, Rng};
use maze_mind_server::scoring::{stars_for_points, ScoreLedger};
use maze_mind_server::store::MemoryStore;
use maze_mind_server::types::{
    AttemptMetrics, DdaMode, DdaTuning, Difficulty, Level, MazeAnalysis, RecordAttemptInput,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

const SIM_EPOCH_MS: u64 = 1_767_225_600_000;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    players: Option<usize>,
    #[arg(long)]
    attempts: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// `campaign` or `practice_ia`.
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct SyntheticPlayer {
    id: String,
    ability: f64,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    attempt: usize,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct PlayerResultLine {
    player: String,
    ability: f64,
    mode: DdaMode,
    attempts: usize,
    completions: usize,
    #[serde(rename = "finalMu")]
    final_mu: Option<f64>,
    #[serde(rename = "finalSigma")]
    final_sigma: Option<f64>,
    #[serde(rename = "avgMemorizeTime")]
    avg_memorize_time: f64,
    #[serde(rename = "avgMazeSide")]
    avg_maze_side: f64,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug)]
struct PlayerRunResult {
    result: PlayerResultLine,
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "playerCount")]
    player_count: usize,
    #[serde(rename = "attemptCount")]
    attempt_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "completionRate")]
    completion_rate: f64,
    players: Vec<PlayerResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<usize>,
    details: Value,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(now_ms) as u32;
    let mode = match cli.mode.as_deref().map(DdaMode::parse) {
        None => DdaMode::PracticeIa,
        Some(Some(mode @ (DdaMode::Campaign | DdaMode::PracticeIa))) => mode,
        Some(_) => {
            eprintln!("--mode must be campaign or practice_ia");
            std::process::exit(2);
        }
    };
    let player_count = cli.players.unwrap_or(4).clamp(1, 200);
    let attempt_count = cli.attempts.unwrap_or(12).clamp(1, 500);
    let run_started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, run_started_at_ms));

    let engine = DdaEngine::new(MemoryStore::new(), EngineOptions::default());
    let mut has_anomaly = false;
    let mut total_anomalies = 0usize;
    let mut player_results = Vec::new();

    for player in build_players(player_count, seed) {
        emit_log(
            "info",
            "player_started",
            &run_id,
            Some(&player.id),
            None,
            json!({ "ability": player.ability, "mode": mode }),
        );
        let run = run_player(&engine, &player, mode, attempt_count).await;

        for anomaly in &run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &run_id,
                Some(&player.id),
                Some(anomaly.attempt),
                json!({ "message": anomaly.message }),
            );
        }
        if !run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += run.anomaly_records.len();

        emit_log(
            "info",
            "player_finished",
            &run_id,
            Some(&player.id),
            Some(run.result.attempts),
            json!({
                "completions": run.result.completions,
                "finalMu": run.result.final_mu,
                "avgMazeSide": run.result.avg_maze_side,
            }),
        );
        match serde_json::to_string(&run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => eprintln!("failed to serialize player result: {error}"),
        }
        player_results.push(run.result);
    }

    let summary = build_run_summary(
        run_id.clone(),
        run_started_at_ms,
        now_ms(),
        player_results,
        total_anomalies,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        None,
        None,
        json!({
            "playerCount": summary.player_count,
            "attemptCount": summary.attempt_count,
            "anomalyCount": summary.anomaly_count,
            "completionRate": summary.completion_rate,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn build_players(count: usize, seed: u32) -> Vec<SyntheticPlayer> {
    let mut rng = Rng::new(seed);
    (0..count)
        .map(|idx| SyntheticPlayer {
            id: format!("sim_{}", idx + 1),
            ability: 0.15 + rng.next_f64() * 0.8,
            seed: rng.next_u32(),
        })
        .collect()
}

async fn run_player(
    engine: &DdaEngine<MemoryStore>,
    player: &SyntheticPlayer,
    mode: DdaMode,
    attempts: usize,
) -> PlayerRunResult {
    let mut rng = Rng::new(player.seed);
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut completions = 0usize;
    let mut memorize_total = 0u64;
    let mut side_total = 0u64;

    for attempt in 0..attempts {
        let level = match next_level(engine, player, mode, attempt).await {
            Ok(level) => level,
            Err(error) => {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    attempt,
                    format!("level generation failed: {error}"),
                );
                continue;
            }
        };
        let analysis = analyze_level(&level);
        for message in collect_analysis_anomalies(&level, &analysis) {
            push_anomaly(&mut anomalies, &mut anomaly_records, &mut anomaly_seen, attempt, message);
        }

        let tuning = engine
            .recommend_tuning(&player.id, mode, &level, &analysis)
            .await;
        for message in collect_tuning_anomalies(&tuning) {
            push_anomaly(&mut anomalies, &mut anomaly_records, &mut anomaly_seen, attempt, message);
        }
        memorize_total += tuning.memorize_time as u64;
        side_total += level.width.max(level.height) as u64;

        let config = engine.maze_rating_config().await;
        let rating = normalize_rating(engine.rate_maze(&analysis).await, &config.scale);
        let metrics = synthesize_attempt(&mut rng, player.ability, rating, &analysis, &tuning, attempt);
        if metrics.completed {
            completions += 1;
        }

        let input = RecordAttemptInput {
            user_id: player.id.clone(),
            mode,
            level,
            analysis,
            attempt: metrics,
            settings_snapshot: None,
        };
        if let Err(error) = engine.record_attempt_and_update_skill(&input).await {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                attempt,
                format!("record failed: {error}"),
            );
        }

        if let Some(skill) = engine
            .get_skill(&player.id, mode, input.level.difficulty)
            .await
        {
            if !(0.0..=1.0).contains(&skill.skill_mu) {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    attempt,
                    format!("skill mu out of range: {}", skill.skill_mu),
                );
            }
        }
    }

    let final_skill = engine.get_aggregated_skill(&player.id, mode).await;
    let played = attempts.max(1) as f64;
    PlayerRunResult {
        result: PlayerResultLine {
            player: player.id.clone(),
            ability: round3(player.ability),
            mode,
            attempts,
            completions,
            final_mu: final_skill.as_ref().map(|row| row.skill_mu),
            final_sigma: final_skill.as_ref().map(|row| row.skill_sigma),
            avg_memorize_time: round3(memorize_total as f64 / played),
            avg_maze_side: round3(side_total as f64 / played),
            anomalies,
        },
        anomaly_records,
    }
}

async fn next_level(
    engine: &DdaEngine<MemoryStore>,
    player: &SyntheticPlayer,
    mode: DdaMode,
    attempt: usize,
) -> Result<Level, MazeError> {
    let seed = format!("{}-{}-{attempt}", player.seed, player.id);
    match mode {
        DdaMode::Campaign => {
            let number = (attempt as u32 % CAMPAIGN_LEVELS_PER_DIFFICULTY) + 1;
            generate_campaign_level(Difficulty::Easy, number, Some(seed))
        }
        _ => {
            let mut params = engine.recommend_practice_params(&player.id).await;
            params.seed = seed;
            generate_practice_ia_level(&params, attempt as u32)
        }
    }
}

/// Plays one level with a crude ability model: stronger players make fewer
/// wrong turns and finish harder mazes more often.
fn synthesize_attempt(
    rng: &mut Rng,
    ability: f64,
    rating_norm: f64,
    analysis: &MazeAnalysis,
    tuning: &DdaTuning,
    attempt: usize,
) -> AttemptMetrics {
    let optimal = analysis.optimal_path_length.max(1) as f64;
    let memorize_bonus = (tuning.memorize_time as f64 - 10.0) * 0.015;
    let success_chance = (0.55 + (ability - rating_norm) * 1.2 + memorize_bonus).clamp(0.05, 0.95);
    let completed = rng.bool(success_chance);

    let sloppiness = 1.0 - ability;
    let moves = (optimal * (1.0 + sloppiness * rng.next_f64() * 1.5)).round() as u32;
    let mut crashes = rng.int(0, (sloppiness * 4.0).round() as i32) as u32;
    if !completed {
        crashes += 3;
    }
    let revisits = (moves as f64 - optimal).max(0.0) as u32 / 2;
    let time_seconds = optimal * (0.7 + sloppiness * 1.6 + rng.next_f64() * 0.4);

    let mut ledger = ScoreLedger::from_tuning(tuning);
    ledger.tick(time_seconds, false);
    if rng.bool(sloppiness * 0.6) {
        ledger.use_reveal();
    }
    if rng.bool(sloppiness * 0.3) {
        ledger.use_crash_help();
    }
    let points_final = if completed { ledger.points().floor() } else { 0.0 };
    let stars = if completed {
        stars_for_points(points_final, &tuning.star_thresholds)
    } else {
        0
    };

    let started_ms = SIM_EPOCH_MS + attempt as u64 * 120_000;
    let ended_ms = started_ms + (time_seconds * 1000.0) as u64;
    AttemptMetrics {
        started_at: iso_at(started_ms),
        ended_at: iso_at(ended_ms),
        completed,
        fail_reason: (!completed).then(|| "crashes".to_string()),
        time_seconds: round3(time_seconds),
        points_final,
        stars,
        moves,
        crashes,
        revisits,
        reveal_used: ledger.reveal_used(),
        path_help_seconds: ledger.path_help_seconds(),
        crash_help_used: ledger.crash_help_used(),
        skipped_memorize: false,
        memorize_time: tuning.memorize_time,
    }
}

fn collect_analysis_anomalies(level: &Level, analysis: &MazeAnalysis) -> Vec<String> {
    let mut anomalies = Vec::new();
    if analysis.total_cells != (level.width * level.height) as u32 {
        anomalies.push(format!(
            "total cells mismatch: {} for {}x{}",
            analysis.total_cells, level.width, level.height
        ));
    }
    let path = &analysis.path_cells;
    if path.first() != Some(&level.start) || path.last() != Some(&level.exit) {
        anomalies.push(format!("path endpoints wrong on {}", level.id));
    }
    if analysis.optimal_path_length as usize + 1 != path.len() {
        anomalies.push(format!("path length mismatch on {}", level.id));
    }
    if path
        .windows(2)
        .any(|pair| !open_neighbors(&level.maze, pair[0]).contains(&pair[1]))
    {
        anomalies.push(format!("path crosses a wall on {}", level.id));
    }
    anomalies
}

fn collect_tuning_anomalies(tuning: &DdaTuning) -> Vec<String> {
    let mut anomalies = Vec::new();
    if !(3..=30).contains(&tuning.memorize_time) {
        anomalies.push(format!("memorize time out of range: {}", tuning.memorize_time));
    }
    if !(1..=4).contains(&tuning.reveal_charges) {
        anomalies.push(format!("reveal charges out of range: {}", tuning.reveal_charges));
    }
    let ranges = [
        ("pointsLossPerSecond", tuning.points_loss_per_second, 0.6, 3.2),
        ("pointsLossPathHelp", tuning.points_loss_path_help, 0.5, 4.5),
        ("pointsLossCrashHelp", tuning.points_loss_crash_help, 10.0, 35.0),
        ("pointsCostReveal", tuning.points_cost_reveal, 30.0, 110.0),
    ];
    for (name, value, min, max) in ranges {
        if !value.is_finite() || value < min || value > max {
            anomalies.push(format!("{name} out of range: {value}"));
        }
    }
    if tuning.star_thresholds.iter().any(|value| *value < 1) {
        anomalies.push("star threshold below 1".to_string());
    }
    anomalies
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    attempt: usize,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        attempt,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_run_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    players: Vec<PlayerResultLine>,
    anomaly_count: usize,
) -> RunSummary {
    let attempt_count: usize = players.iter().map(|player| player.attempts).sum();
    let completions: usize = players.iter().map(|player| player.completions).sum();
    let completion_rate = if attempt_count == 0 {
        0.0
    } else {
        round3(completions as f64 / attempt_count as f64)
    };
    RunSummary {
        run_id,
        started_at_ms,
        finished_at_ms,
        player_count: players.len(),
        attempt_count,
        anomaly_count,
        completion_rate,
        players,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    run_id: &str,
    player: Option<&str>,
    attempt: Option<usize>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        player: player.map(|value| value.to_string()),
        attempt,
        details,
    };
    match serde_json::to_string(&log_line) {
        Ok(line) => eprintln!("{line}"),
        Err(error) => eprintln!("failed to serialize log line: {error}"),
    }
}

fn iso_at(ms: u64) -> String {
    DateTime::from_timestamp_millis(ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
