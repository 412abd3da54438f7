use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use domain::{ChatMessage, UserId};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    page: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/{user_id}", get(websocket_upgrade))
        .route(
            "/getConversation/{to_user_id}/{from_user_id}",
            get(get_conversation),
        )
        .route("/UserSessionCheck/{user_id}", get(user_session_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn parse_user_id(raw: String, field: &str) -> Result<UserId, ApiError> {
    let user_id = UserId::new(raw);
    if !user_id.is_well_formed() {
        return Err(ApiError::bad_request(format!("{field} is not a valid user id")));
    }
    Ok(user_id)
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = parse_user_id(user_id, "userID")?;
    let max_frame_bytes = state.config.websocket.max_frame_bytes;

    Ok(ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| WebSocketConnection::new(&state, user_id).run(socket)))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path((to_user_id, from_user_id)): Path<(String, String)>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let to_user_id = parse_user_id(to_user_id, "toUserID")?;
    let from_user_id = parse_user_id(from_user_id, "fromUserID")?;

    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::bad_request("page starts at 1"));
    }

    let messages = state
        .messages
        .conversation(&to_user_id, &from_user_id, page)
        .await?;
    Ok(Json(messages))
}

/// 用户存在且在线时返回 true
async fn user_session_check(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<bool>, ApiError> {
    let user_id = parse_user_id(user_id, "userID")?;
    let online = state
        .presence
        .lookup_by_id(&user_id)
        .await?
        .is_some_and(|user| user.online);
    Ok(Json(online))
}
