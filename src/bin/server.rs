use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use maze_mind_server::constants::LEVEL_STAR_THRESHOLDS;
use maze_mind_server::dda::{practice_ia_params_from_skill, tuning_from_skill};
use maze_mind_server::engine::{DdaEngine, EngineOptions};
use maze_mind_server::file_store::FileStore;
use maze_mind_server::maze::{
    generate_campaign_level, generate_level, generate_practice_ia_level, LevelParams,
};
use maze_mind_server::maze_stats::{analyze_level, turn_positions};
use maze_mind_server::practice::{generate_practice_normal_level, practice_score_tier};
use maze_mind_server::rating::compute_maze_rating;
use maze_mind_server::rng::{create_seed, now_ms};
use maze_mind_server::server_protocol::parse_attempt_submission;
use maze_mind_server::server_utils::{
    normalize_dimension, normalize_seed, parse_campaign_level_number, parse_difficulty,
    parse_dimension, parse_mode, parse_practice_level_index, sanitize_user_id,
};
use maze_mind_server::types::{DdaMode, Difficulty, PracticeIaParams, RecordAttemptInput};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

type SharedEngine = Arc<DdaEngine<FileStore>>;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user: Option<String>,
    seed: Option<String>,
    run: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MazeQuery {
    width: Option<String>,
    height: Option<String>,
    seed: Option<String>,
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkillQuery {
    difficulty: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let db_path = std::env::var("MAZE_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/maze-mind.json"));
    let engine: SharedEngine = Arc::new(DdaEngine::new(
        FileStore::new(db_path),
        EngineOptions::default(),
    ));
    info!("[server] store file: {}", engine.store().file_path().display());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/levels/{difficulty}/{number}", get(campaign_level_handler))
        .route("/api/practice-ia/next", get(practice_ia_handler))
        .route("/api/practice-normal/{level}", get(practice_normal_handler))
        .route("/api/maze", get(maze_handler))
        .route("/api/attempts", post(record_attempt_handler))
        .route("/api/skill/{user}/{mode}", get(skill_handler))
        .with_state(engine);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!("[server] static file root: {}", static_dir.to_string_lossy());
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    info!("[server] listening on :{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn resolve_static_dir() -> Option<PathBuf> {
    let raw = std::env::var("STATIC_DIR").ok()?;
    let path = PathBuf::from(raw);
    if path.join("index.html").is_file() {
        return Some(path);
    }
    warn!("[server] STATIC_DIR {} has no index.html", path.display());
    None
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn campaign_level_handler(
    State(engine): State<SharedEngine>,
    Path((difficulty, number)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
) -> Response {
    let Some(difficulty) = parse_difficulty(Some(&difficulty), Difficulty::Easy) else {
        return error_response(StatusCode::NOT_FOUND, "unknown difficulty");
    };
    let Some(number) = parse_campaign_level_number(&number) else {
        return error_response(StatusCode::NOT_FOUND, "unknown level");
    };
    let seed = normalize_seed(query.seed.as_deref());
    let level = match generate_campaign_level(difficulty, number, seed) {
        Ok(level) => level,
        Err(error) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string()),
    };
    let analysis = analyze_level(&level);
    let config = engine.maze_rating_config().await;
    let rating = compute_maze_rating(&analysis, &config);

    let tuning = match query.user.as_deref().and_then(sanitize_user_id) {
        Some(user) => {
            engine
                .recommend_tuning(&user, DdaMode::Campaign, &level, &analysis)
                .await
        }
        None => tuning_from_skill(
            None,
            level.memorize_time,
            rating,
            &config.scale,
            &engine.options().tuner,
        ),
    };

    Json(json!({
        "level": level,
        "analysis": analysis,
        "mazeRating": rating,
        "tuning": tuning,
    }))
    .into_response()
}

async fn practice_ia_handler(
    State(engine): State<SharedEngine>,
    Query(query): Query<UserQuery>,
) -> Response {
    let params = match query.user.as_deref().and_then(sanitize_user_id) {
        Some(user) => engine.recommend_practice_params(&user).await,
        None => practice_ia_params_from_skill(None, create_seed(now_ms()), &engine.options().tuner),
    };
    let run = query
        .run
        .as_deref()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let (params, level) = match generate_practice_ia_level(&params, run) {
        Ok(level) => (params, level),
        Err(error) => {
            warn!("[server] practice level generation failed: {error}");
            let fallback = PracticeIaParams::fallback(params.seed);
            match generate_practice_ia_level(&fallback, run) {
                Ok(level) => (fallback, level),
                Err(error) => {
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string())
                }
            }
        }
    };
    let analysis = analyze_level(&level);
    let rating = engine.rate_maze(&analysis).await;

    Json(json!({
        "params": params,
        "level": level,
        "analysis": analysis,
        "mazeRating": rating,
    }))
    .into_response()
}

async fn practice_normal_handler(
    Path(level_index): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response {
    let Some(level_index) = parse_practice_level_index(&level_index) else {
        return error_response(StatusCode::NOT_FOUND, "unknown level");
    };
    let level = match generate_practice_normal_level(level_index, normalize_seed(query.seed.as_deref())) {
        Ok(level) => level,
        Err(error) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string()),
    };
    let tier = practice_score_tier(level_index);

    Json(json!({
        "level": level,
        "tier": tier,
        "scoreRules": tier.score_rules(),
    }))
    .into_response()
}

async fn maze_handler(
    State(engine): State<SharedEngine>,
    Query(query): Query<MazeQuery>,
) -> Response {
    let Some(difficulty) = parse_difficulty(query.difficulty.as_deref(), Difficulty::Normal) else {
        return error_response(StatusCode::BAD_REQUEST, "unknown difficulty");
    };
    let width = normalize_dimension(parse_dimension(query.width.as_deref()), 7);
    let height = normalize_dimension(parse_dimension(query.height.as_deref()), 7);
    let seed = normalize_seed(query.seed.as_deref()).unwrap_or_else(|| create_seed(now_ms()));

    let mut level = match generate_level(&LevelParams {
        width,
        height,
        difficulty,
        memorize_time: 10,
        stars: LEVEL_STAR_THRESHOLDS.to_vec(),
        level_number: 1,
        seed: Some(seed.clone()),
    }) {
        Ok(level) => level,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, &error.to_string()),
    };
    level.id = format!("maze-{width}x{height}-{}-{seed}", difficulty.as_str());
    let analysis = analyze_level(&level);
    let rating = engine.rate_maze(&analysis).await;

    Json(json!({
        "seed": seed,
        "level": level,
        "analysis": analysis,
        "turnPositions": turn_positions(&analysis.path_cells),
        "mazeRating": rating,
    }))
    .into_response()
}

async fn record_attempt_handler(State(engine): State<SharedEngine>, body: String) -> Response {
    let Some(submission) = parse_attempt_submission(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid attempt payload");
    };
    let analysis = analyze_level(&submission.level);
    let input = RecordAttemptInput {
        user_id: submission.user_id,
        mode: submission.mode,
        level: submission.level,
        analysis,
        attempt: submission.attempt,
        settings_snapshot: submission.settings_snapshot,
    };

    if let Err(error) = engine.record_attempt_and_update_skill(&input).await {
        warn!("[server] failed to record attempt for {}: {error}", input.user_id);
        return error_response(StatusCode::SERVICE_UNAVAILABLE, &error.to_string());
    }

    let skill: Option<Value> = if engine.is_skill_mode(input.mode) {
        engine
            .get_skill(&input.user_id, input.mode, input.level.difficulty)
            .await
            .and_then(|row| serde_json::to_value(row).ok())
    } else {
        None
    };
    Json(json!({ "ok": true, "skill": skill })).into_response()
}

async fn skill_handler(
    State(engine): State<SharedEngine>,
    Path((user, mode)): Path<(String, String)>,
    Query(query): Query<SkillQuery>,
) -> Response {
    let Some(user) = sanitize_user_id(&user) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid user id");
    };
    let Some(mode) = parse_mode(&mode) else {
        return error_response(StatusCode::NOT_FOUND, "unknown mode");
    };

    let row = match query.difficulty.as_deref() {
        Some(raw) => {
            let Some(difficulty) = parse_difficulty(Some(raw), Difficulty::Easy) else {
                return error_response(StatusCode::BAD_REQUEST, "unknown difficulty");
            };
            engine.get_skill(&user, mode, difficulty).await
        }
        None => engine.get_aggregated_skill(&user, mode).await,
    };

    match row {
        Some(row) => Json(row).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no skill recorded"),
    }
}
