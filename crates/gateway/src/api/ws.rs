//! WebSocket endpoint: one socket per session.
//!
//! `GET /v1/ws?session_id=<id>` — a missing id starts a fresh session;
//! a known id resumes it from the journal. A second socket for a live
//! session is rejected.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use tether_sessions::{generate_session_id, is_valid_session_id};

use crate::runtime::session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session_id: Option<String>,
}

pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let session_id = match query.session_id {
        Some(id) if is_valid_session_id(&id) => id,
        Some(id) => {
            tracing::warn!(session_id = %id, "rejecting invalid session id");
            return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
        }
        None => generate_session_id(),
    };

    if !state.active.lock().insert(session_id.clone()) {
        return (StatusCode::CONFLICT, "session already connected").into_response();
    }

    tracing::info!(session_id = %session_id, "session socket opening");
    ws.on_upgrade(move |socket| session::run_session(state, socket, session_id))
        .into_response()
}
