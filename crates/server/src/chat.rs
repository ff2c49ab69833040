use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use servyy_agent::{AgentRuntime, TurnOutcome};
use servyy_core::domain::conversation::UserId;
use servyy_core::errors::InterfaceError;
use servyy_db::DbPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::health;

const MISSING_MESSAGE: &str = "Missing 'message' field";
const EMPTY_MESSAGE: &str = "Message cannot be empty";
const NOT_FOUND: &str = "Endpoint not found. Use POST /chat";
const METHOD_NOT_ALLOWED: &str = "Method not allowed. Use POST request";

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub user_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: &'static str,
}

type ErrorResponse = (StatusCode, Json<ErrorBody>);

fn error_response(status: StatusCode, message: &str) -> ErrorResponse {
    (status, Json(ErrorBody { error: message.to_string(), status: "error" }))
}

/// Full HTTP surface: `POST /chat`, `GET /health`, JSON 404/405 bodies and CORS.
pub fn app(runtime: Arc<AgentRuntime>, db_pool: DbPool, cors_allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/chat", post(chat).fallback(method_not_allowed))
        .with_state(ChatState { runtime })
        .merge(health::router(db_pool))
        .fallback(not_found)
        .layer(cors_layer(cors_allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(event_name = "server.cors.invalid_origin", origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn chat(
    State(state): State<ChatState>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ErrorResponse> {
    let correlation_id = Uuid::new_v4().to_string();

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, MISSING_MESSAGE))?;
    let Some(Value::String(message)) = request.message else {
        return Err(error_response(StatusCode::BAD_REQUEST, MISSING_MESSAGE));
    };
    if message.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, EMPTY_MESSAGE));
    }

    let user_id = match request.user_id.as_ref().and_then(scalar_text).and_then(|raw| UserId::parse(&raw)) {
        Some(user_id) => user_id,
        None => {
            let generated = UserId::generate();
            info!(
                event_name = "server.chat.user_id_generated",
                correlation_id = %correlation_id,
                user_id = %generated,
                "generated user id for anonymous caller"
            );
            generated
        }
    };

    match state.runtime.handle_message(&correlation_id, &user_id, &message).await {
        Ok(TurnOutcome::Rejected) => Err(error_response(StatusCode::BAD_REQUEST, EMPTY_MESSAGE)),
        Ok(TurnOutcome::Refused { reply }) | Ok(TurnOutcome::Completed { reply }) => {
            Ok(Json(ChatResponse { response: reply, user_id: user_id.0, status: "success" }))
        }
        Err(turn_error) => {
            let failure =
                InterfaceError::Internal { message: turn_error.to_string(), correlation_id };
            error!(
                event_name = "server.chat.failed",
                correlation_id = %failure.correlation_id(),
                user_id = %user_id,
                error = %failure,
                "chat turn failed"
            );
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, failure.user_message()))
        }
    }
}

/// Strings are taken as-is. Numbers and booleans are stringified.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

async fn not_found() -> ErrorResponse {
    error_response(StatusCode::NOT_FOUND, NOT_FOUND)
}

async fn method_not_allowed() -> ErrorResponse {
    error_response(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED)
}
