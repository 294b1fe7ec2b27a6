//! HTTP routes.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tapgate_core::card::UpdateForm;
use tapgate_core::registration::{CONFLICT_MESSAGE, RegistrationForm};

use crate::error::ApiResult;
use crate::gate::{Gate, LoginForm, ReaderMode, RegisterOutcome};
use crate::storage::EventFilter;
use crate::ws;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Gate,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tap", post(tap))
        .route("/register_card", post(register_card))
        .route("/users", get(list_users))
        .route(
            "/user/{card_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/user_counts", get(user_counts))
        .route("/login", post(login))
        .route("/logs", get(logs))
        .route("/mode", get(get_mode).post(set_mode))
        .route("/trigger_buzzer", post(trigger_buzzer))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Decode a JSON body. Readers often omit the content type, so the header is
/// not checked; an empty body decodes as all fields absent.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| tapgate_core::Error::from(e).into())
}

#[derive(Debug, Default, Deserialize)]
struct TapRequest {
    card_id: Option<String>,
    site_id: Option<String>,
}

/// `POST /tap`
async fn tap(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let req: TapRequest = parse_body(&body)?;
    let outcome = state
        .gate
        .tap(req.card_id.as_deref(), req.site_id.as_deref())
        .await?;

    let reason = outcome.decision.reason;
    let mut response = json!({
        "status": "ok",
        "access": outcome.decision.outcome(),
        "reason": reason.message(),
        "reason_code": reason,
        "mode": outcome.mode,
        "event_id": outcome.event.id,
    });
    if let Some(user) = outcome.decision.user {
        response["user"] = json!(user);
    }
    Ok(Json(response))
}

/// `POST /register_card`
async fn register_card(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let form: RegistrationForm = parse_body(&body)?;
    let response = match state.gate.register(&form).await? {
        RegisterOutcome::Saved { created, user } => {
            let message = if created {
                "Card registered"
            } else {
                "Card re-registered"
            };
            Json(json!({
                "status": "saved",
                "message": message,
                "created": created,
                "user": user,
            }))
            .into_response()
        }
        RegisterOutcome::Conflict => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "failed", "message": CONFLICT_MESSAGE })),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct UsersQuery {
    site_id: Option<String>,
}

/// `GET /users?site_id=`
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let users = state.gate.users(query.site_id.as_deref()).await?;
    Ok(Json(json!({ "users": users })))
}

/// `GET /user/{card_id}`
async fn get_user(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let response = match state.gate.user(&card_id).await? {
        Some(user) => json!({ "found": true, "user": user }),
        None => json!({ "found": false }),
    };
    Ok(Json(response))
}

/// `PUT /user/{card_id}`
async fn update_user(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let form: UpdateForm = parse_body(&body)?;
    let user = state.gate.update_user(&card_id, &form).await?;
    Ok(Json(json!({ "status": "updated", "user": user })))
}

/// `DELETE /user/{card_id}`
async fn delete_user(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.gate.delete_user(&card_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// `GET /user_counts`
async fn user_counts(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let counts = state.gate.user_counts().await?;
    Ok(Json(json!(counts)))
}

/// `POST /login`
async fn login(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let form: LoginForm = parse_body(&body)?;
    let user = state.gate.login(&form).await?;
    Ok(Json(json!({ "status": "ok", "user": user })))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<u32>,
    card_id: Option<String>,
}

/// `GET /logs?limit=&card_id=`
async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let events = state
        .gate
        .events(&EventFilter {
            card_id: query.card_id,
            limit: query.limit,
        })
        .await?;
    Ok(Json(json!({ "events": events })))
}

/// `GET /mode`
async fn get_mode(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "mode": state.gate.mode().await }))
}

#[derive(Debug, Default, Deserialize)]
struct ModeRequest {
    mode: Option<String>,
}

/// `POST /mode`
async fn set_mode(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let req: ModeRequest = parse_body(&body)?;
    let raw = tapgate_core::card::require_field(req.mode.as_deref(), "mode")?;
    let mode: ReaderMode = raw.parse()?;
    state.gate.set_mode(mode).await;
    Ok(Json(json!({ "status": "ok", "mode": mode })))
}

#[derive(Debug, Default, Deserialize)]
struct BuzzerRequest {
    card_id: Option<String>,
    duration_ms: Option<u64>,
}

/// `POST /trigger_buzzer`
async fn trigger_buzzer(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let req: BuzzerRequest = parse_body(&body)?;
    let outcome = state
        .gate
        .trigger_buzzer(req.card_id.as_deref(), req.duration_ms)
        .await?;
    Ok(Json(json!({
        "status": "ok",
        "event_id": outcome.event_id,
        "delivered": outcome.delivered,
    })))
}

/// `GET /health`
async fn health() -> &'static str {
    "OK"
}
