//! Session management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use doctalk_common::{errors::Result, session::DocumentInfo};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;

/// Create session response
#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub expires_at: String,
}

/// Session state response
#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub document: Option<DocumentInfo>,
    pub turn_count: usize,
    pub created_at: String,
    pub last_active_at: String,
    pub expires_at: String,
}

/// Create a new session
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    let handle = state.sessions.create().await;
    let session = handle.lock().await;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            expires_at: session.expires_at.to_rfc3339(),
        }),
    ))
}

/// Get session state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let handle = state.sessions.get(session_id).await?;
    let session = handle.lock().await;

    Ok(Json(SessionResponse {
        session_id: session.id,
        document: session.document.as_ref().map(|d| d.info.clone()),
        turn_count: session.memory.turn_count(),
        created_at: session.created_at.to_rfc3339(),
        last_active_at: session.last_active_at.to_rfc3339(),
        expires_at: session.expires_at.to_rfc3339(),
    }))
}

/// End a session, discarding its index, transcript and uploaded file
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sessions.remove(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
