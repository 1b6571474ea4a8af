use axum::{Json, extract::State};
use uuid::Uuid;

use crate::{
    error::ApiError,
    events::{archive_event, get_event},
    executions::list_for_event,
    extractors::ValidPath,
    state::AppState,
    types::{ArchiveEventResponse, GetEventResponse, ListActionsResponse, ReplayEventResponse},
};

pub async fn get_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<Uuid>,
) -> Result<Json<GetEventResponse>, ApiError> {
    let event = get_event(&state.pool, event_id).await?;
    Ok(Json(GetEventResponse { event }))
}

pub async fn list_actions_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<Uuid>,
) -> Result<Json<ListActionsResponse>, ApiError> {
    get_event(&state.pool, event_id).await?;
    let actions = list_for_event(&state.pool, event_id).await?;
    Ok(Json(ListActionsResponse { actions }))
}

pub async fn replay_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<Uuid>,
) -> Result<Json<ReplayEventResponse>, ApiError> {
    let replayed = state.ingest.replay(event_id).await?;
    Ok(Json(ReplayEventResponse {
        event: replayed.event,
        actions: replayed.actions,
    }))
}

pub async fn archive_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<Uuid>,
) -> Result<Json<ArchiveEventResponse>, ApiError> {
    let event = archive_event(&state.pool, event_id, state.clock.now()).await?;
    Ok(Json(ArchiveEventResponse { event }))
}
