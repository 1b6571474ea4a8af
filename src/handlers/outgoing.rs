use axum::{Json, extract::State};

use crate::{
    error::ApiError,
    extractors::ValidJson,
    outgoing::{NewOutgoing, enqueue},
    state::AppState,
    types::{EnqueueOutgoingRequest, EnqueueOutgoingResponse},
};

pub async fn enqueue_outgoing_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<EnqueueOutgoingRequest>,
) -> Result<Json<EnqueueOutgoingResponse>, ApiError> {
    validate_request(&req)?;

    let new = NewOutgoing {
        endpoint_url: req.endpoint_url.trim().to_string(),
        event_type: req.event_type.trim().to_string(),
        payload: req.payload,
        signing_secret: req.signing_secret.filter(|secret| !secret.is_empty()),
    };
    let event = enqueue(&state.pool, &new, state.clock.now()).await?;

    Ok(Json(EnqueueOutgoingResponse { event }))
}

fn validate_request(req: &EnqueueOutgoingRequest) -> Result<(), ApiError> {
    let url = req.endpoint_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::validation(
            "endpoint_url must be an http(s) URL",
        ));
    }
    if req.event_type.trim().is_empty() {
        return Err(ApiError::validation("event_type is required"));
    }
    Ok(())
}
