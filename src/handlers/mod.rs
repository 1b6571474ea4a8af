pub mod events;
pub mod ingest;
pub mod outgoing;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

use crate::{auth::admin_auth, state::AppState};

/// Hard cap on inbound bodies; each provider enforces its own smaller limit.
const MAX_WEBHOOK_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/events/:id", get(events::get_event_handler))
        .route("/events/:id/actions", get(events::list_actions_handler))
        .route("/events/:id/replay", post(events::replay_event_handler))
        .route("/events/:id/archive", post(events::archive_event_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route(
            "/webhooks/:provider/:token",
            post(ingest::ingest_handler).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .route("/internal/outgoing", post(outgoing::enqueue_outgoing_handler))
        .nest("/api", admin)
        .with_state(state)
}
