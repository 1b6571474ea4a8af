use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

use crate::{
    crypto::Headers,
    error::ApiError,
    extractors::ValidPath,
    ingest::{IngestOutcome, Rejection},
    state::AppState,
};

pub async fn ingest_handler(
    State(state): State<AppState>,
    ValidPath((provider, token)): ValidPath<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let raw_body = std::str::from_utf8(&body)
        .map_err(|_| ApiError::validation("webhook body must be UTF-8"))?;
    let headers = capture_headers(&headers);

    let outcome = state
        .ingest
        .ingest(&provider, &token, raw_body, &headers)
        .await?;

    let status = match &outcome {
        IngestOutcome::Accepted { .. } | IngestOutcome::Duplicate { .. } => StatusCode::OK,
        IngestOutcome::Rejected(rejection) => rejection_status(rejection),
    };
    let mut response = (status, Json(outcome.response())).into_response();
    if let IngestOutcome::Rejected(Rejection::RateLimited(exceeded)) = &outcome {
        response
            .headers_mut()
            .insert(RETRY_AFTER, retry_after_header(exceeded.retry_after));
    }
    Ok(response)
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::UnknownProvider => StatusCode::NOT_FOUND,
        Rejection::InvalidToken | Rejection::InvalidSignature => StatusCode::UNAUTHORIZED,
        Rejection::Inactive => StatusCode::FORBIDDEN,
        Rejection::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Rejection::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        Rejection::MalformedPayload(_) => StatusCode::BAD_REQUEST,
    }
}

/// `Retry-After` in whole seconds, rounded up so clients never retry early.
fn retry_after_header(retry_after: Duration) -> HeaderValue {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    HeaderValue::from(secs.max(1))
}

/// Lower-cased header names; repeated headers are joined with `,`. Values
/// that are not visible ASCII are dropped.
fn capture_headers(headers: &HeaderMap) -> Headers {
    let mut captured = Headers::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        captured
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    captured
}
