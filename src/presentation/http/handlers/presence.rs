//! Presence Handlers
//!
//! Read-only projections of the connection registry for dashboards.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::presentation::websocket::ConnectionRecord;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Online user row; `lastSeen` is ISO-8601
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub username: String,
    pub is_online: bool,
    pub last_seen: String,
}

/// Detailed presence for a single user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub username: String,
    pub is_online: bool,
    pub connected_at: String,
    pub last_seen: String,
}

impl From<&ConnectionRecord> for OnlineUser {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            username: record.username.clone(),
            is_online: true,
            last_seen: record.last_ping_at.to_rfc3339(),
        }
    }
}

/// GET /api/users/online
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<OnlineUser>> {
    let users = state
        .registry
        .snapshot_all()
        .iter()
        .map(OnlineUser::from)
        .collect();
    Json(users)
}

/// GET /api/users/{user_id}/presence
pub async fn user_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserPresence>, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId must not be empty".into()));
    }

    let record = state
        .registry
        .get(&user_id)
        .ok_or_else(|| AppError::NotFound(format!("User {} is offline", user_id)))?;

    Ok(Json(UserPresence {
        user_id: record.user_id,
        username: record.username,
        is_online: true,
        connected_at: record.connected_at.to_rfc3339(),
        last_seen: record.last_ping_at.to_rfc3339(),
    }))
}
