use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use forkcast_core::db::Database;
use forkcast_core::engine::{
    EngineConfig, GenerateOutcome, MealGenerator, RecommendError, RecommendationEngine, StateView,
};
use forkcast_core::models::RecommendedMealRecord;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    generator: Arc<dyn MealGenerator>,
    engine_config: EngineConfig,
    api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct ReadQuery {
    date: Option<String>,
    category: Option<String>,
    tz: Option<i32>,
}

#[derive(Deserialize)]
struct GenerateRequest {
    date: Option<String>,
    category: Option<String>,
    tz: Option<i32>,
}

/// The two PUT sub-operations, split by the `action` discriminator.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum UpdateRequest {
    Commit { record: serde_json::Value },
    MarkExplainerSeen,
}

#[derive(Serialize)]
struct CommitResponse {
    history: Vec<RecommendedMealRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExplainerSeenResponse {
    seen_explain_at: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    NotFound(String),
    PaymentRequired,
    UpstreamFailed,
    NoUniqueResult,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "Insufficient credits".to_string(),
            ),
            Self::UpstreamFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI generation failed".to_string(),
            ),
            Self::NoUniqueResult => (
                StatusCode::BAD_GATEWAY,
                "Could not generate a unique meal; try again".to_string(),
            ),
            Self::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        match err {
            RecommendError::InvalidDate(_) | RecommendError::InvalidRecord(_) => {
                Self::BadRequest(err.to_string())
            }
            RecommendError::UnknownUser(_) => Self::NotFound(err.to_string()),
            RecommendError::InsufficientCredits => Self::PaymentRequired,
            RecommendError::Generator(source) => {
                tracing::error!(error = ?source, "meal generation call failed");
                Self::UpstreamFailed
            }
            RecommendError::Exhausted => Self::NoUniqueResult,
            RecommendError::Internal(err) => Self::Internal(err),
        }
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Run one engine call on a blocking thread: the engine is synchronous and
/// the generator blocks on its own runtime handle.
async fn run_engine<T, F>(state: AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&RecommendationEngine<'_>) -> Result<T, RecommendError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let db = state
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let engine = RecommendationEngine::new(
            &db,
            state.generator.as_ref(),
            &*db,
            &*db,
            state.engine_config.clone(),
        );
        op(&engine)
    })
    .await
    .context("engine task failed")
    .map_err(ApiError::Internal)?;
    result.map_err(ApiError::from)
}

async fn read_recommendation(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<StateView>, ApiError> {
    let date = query.date.unwrap_or_else(today);
    let category = query.category.unwrap_or_default();
    let tz = query.tz.unwrap_or(0);
    let view = run_engine(state, move |engine| {
        engine.read_state(&user, &date, &category, tz)
    })
    .await?;
    Ok(Json(view))
}

async fn generate_recommendation(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateOutcome>, ApiError> {
    let date = req.date.unwrap_or_else(today);
    let category = req.category.unwrap_or_default();
    let tz = req.tz.unwrap_or(0);
    let outcome = run_engine(state, move |engine| {
        engine.generate(&user, &date, &category, tz)
    })
    .await?;
    Ok(Json(outcome))
}

async fn update_recommendation(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Response, ApiError> {
    match req {
        UpdateRequest::Commit { record } => {
            let history = run_engine(state, move |engine| engine.commit(&user, &record)).await?;
            Ok(Json(CommitResponse { history }).into_response())
        }
        UpdateRequest::MarkExplainerSeen => {
            let seen_explain_at =
                run_engine(state, move |engine| engine.mark_explainer_seen(&user)).await?;
            Ok(Json(ExplainerSeenResponse { seen_explain_at }).into_response())
        }
    }
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/users/{user}/recommendation",
            get(read_recommendation)
                .post(generate_recommendation)
                .put(update_recommendation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    db: Database,
    generator: Arc<dyn MealGenerator>,
    engine_config: EngineConfig,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        generator,
        engine_config,
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4],
            &key[key.len() - 4..],
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use axum::body::Body;
    use forkcast_core::engine::GenerationRequest;
    use forkcast_core::models::MacroTotals;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    struct ScriptedGenerator {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    impl MealGenerator for ScriptedGenerator {
        fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted response left"))
        }
    }

    fn salmon_response() -> String {
        json!({
            "mealName": "Lemon garlic salmon",
            "tags": ["High protein"],
            "why": "Fits your remaining macros.",
            "items": [
                { "name": "Baked salmon", "serving_size": "150 g", "servings": 1,
                  "calories": 350, "protein_g": 34, "carbs_g": 0, "fat_g": 22,
                  "fiber_g": 0, "sugar_g": 0 }
            ],
            "recipe": { "servings": 1, "prep_minutes": 5, "cook_minutes": 15,
                        "steps": ["Season the salmon.", "Bake until it flakes."] }
        })
        .to_string()
    }

    fn test_state(api_key: Option<String>, responses: Vec<String>) -> AppState {
        let db = Database::open_in_memory().unwrap();
        db.grant_credits("u1", 100).unwrap();
        db.set_targets(
            "u1",
            &MacroTotals {
                calories: Some(2000.0),
                protein_g: Some(150.0),
                ..MacroTotals::default()
            },
        )
        .unwrap();
        AppState {
            db: Arc::new(Mutex::new(db)),
            generator: Arc::new(ScriptedGenerator::new(responses)),
            engine_config: EngineConfig::default(),
            api_key,
        }
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(
        method: &str,
        uri: &str,
        body: &serde_json::Value,
    ) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_missing_key_returns_401() {
        let app = build_router(test_state(Some("test-key-abc123".to_string()), vec![]));
        let response = app
            .oneshot(get_request("/api/users/u1/recommendation?date=2024-06-15"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_correct_key_succeeds() {
        let app = build_router(test_state(Some("test-key-abc123".to_string()), vec![]));
        let response = app
            .oneshot(
                axum::http::Request::get("/api/users/u1/recommendation?date=2024-06-15")
                    .header("Authorization", "Bearer test-key-abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_returns_context_and_normalized_category() {
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(get_request(
                "/api/users/u1/recommendation?date=2024-06-15&category=LUNCH&tz=-300",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["costCredits"], 25);
        assert_eq!(json["category"], "lunch");
        assert_eq!(json["context"]["targets"]["calories"], 2000.0);
        assert_eq!(json["context"]["remaining"]["calories"], 2000.0);
        assert_eq!(json["seenExplainer"], false);
        assert!(json["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_invalid_date_returns_400() {
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(get_request("/api/users/u1/recommendation?date=June-15"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_unknown_user_returns_404() {
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(get_request(
                "/api/users/ghost/recommendation?date=2024-06-15",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generate_returns_draft_and_charges() {
        let state = test_state(None, vec![salmon_response()]);
        let app = build_router(state.clone());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/users/u1/recommendation",
                &json!({ "date": "2024-06-15", "category": "dinner", "tz": 0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["recommendation"]["mealName"], "Lemon garlic salmon");
        assert_eq!(json["recommendation"]["category"], "dinner");
        assert!(json["recommendation"]["id"].as_str().unwrap().starts_with("rec-"));
        // The draft is not history.
        assert!(json["history"].as_array().unwrap().is_empty());

        let balance = state
            .db
            .lock()
            .unwrap()
            .get_wallet("u1")
            .unwrap()
            .unwrap()
            .total_available_cents;
        assert_eq!(balance, 75);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generate_with_short_balance_returns_402() {
        let state = test_state(None, vec![salmon_response()]);
        state.db.lock().unwrap().charge_wallet("u1", 90).unwrap(); // 10 left
        let app = build_router(state);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/users/u1/recommendation",
                &json!({ "date": "2024-06-15" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generate_upstream_failure_returns_500() {
        // No scripted responses: the generator call itself fails.
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/users/u1/recommendation",
                &json!({ "date": "2024-06-15" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "AI generation failed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generate_exhaustion_returns_502_and_never_charges() {
        let state = test_state(
            None,
            vec![salmon_response(), salmon_response(), salmon_response()],
        );
        state
            .db
            .lock()
            .unwrap()
            .add_favorite(
                "u1",
                "Lemon garlic salmon",
                &forkcast_core::models::normalize_items(
                    &json!([{ "name": "Baked salmon", "servings": 1 }]),
                ),
            )
            .unwrap();
        let app = build_router(state.clone());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/users/u1/recommendation",
                &json!({ "date": "2024-06-15", "category": "dinner" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let balance = state
            .db
            .lock()
            .unwrap()
            .get_wallet("u1")
            .unwrap()
            .unwrap()
            .total_available_cents;
        assert_eq!(balance, 100);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_then_read_shows_history() {
        let state = test_state(None, vec![]);
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_request(
                "PUT",
                "/api/users/u1/recommendation",
                &json!({
                    "action": "commit",
                    "record": {
                        "date": "2024-06-15",
                        "category": "lunch",
                        "mealName": "Chicken and rice",
                        "items": [
                            { "name": "Chicken breast", "servings": 1, "calories": 280 },
                            { "name": "Brown rice", "servings": 1, "calories": 215 }
                        ]
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let committed = &json["history"][0];
        assert!(committed["id"].as_str().unwrap().starts_with("rec-"));
        assert!(!committed["createdAt"].as_str().unwrap().is_empty());
        assert_eq!(committed["totals"]["calories"], 495.0);

        let app = build_router(state);
        let response = app
            .oneshot(get_request("/api/users/u1/recommendation?date=2024-06-15"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        assert_eq!(json["history"][0]["mealName"], "Chicken and rice");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_empty_items_returns_400() {
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(json_request(
                "PUT",
                "/api/users/u1/recommendation",
                &json!({ "action": "commit", "record": { "mealName": "Ghost", "items": [] } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_explainer_seen_is_idempotent() {
        let state = test_state(None, vec![]);
        let app = build_router(state.clone());
        let first = app
            .oneshot(json_request(
                "PUT",
                "/api/users/u1/recommendation",
                &json!({ "action": "markExplainerSeen" }),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        let ts = first["seenExplainAt"].as_str().unwrap().to_string();
        assert!(!ts.is_empty());

        let app = build_router(state);
        let second = app
            .oneshot(json_request(
                "PUT",
                "/api/users/u1/recommendation",
                &json!({ "action": "markExplainerSeen" }),
            ))
            .await
            .unwrap();
        let second = body_json(second).await;
        assert_eq!(second["seenExplainAt"], ts);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn security_headers_present() {
        let app = build_router(test_state(None, vec![]));
        let response = app
            .oneshot(get_request("/api/users/u1/recommendation?date=2024-06-15"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret path /home/user/.forkcast/db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
    }
}
