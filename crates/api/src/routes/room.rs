use axum::{
    Json,
    extract::{Path, State},
};
use pointroom_protocol::RoomSummary;

use crate::{error::ApiError, state::AppState};

/// Public room summary used by join pages. Codes are case-insensitive.
pub async fn summary(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, ApiError> {
    let summary = state.engine.room_summary(&code)?;
    Ok(Json(summary))
}
