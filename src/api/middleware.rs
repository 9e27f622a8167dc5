//! Request correlation-id middleware: reads `X-Correlation-ID` or mints one, attaches it
//! to the request's tracing span, and reflects it back on the response.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

static CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

tokio::task_local! {
    /// Set for the lifetime of a single request; `WeaverError`'s `IntoResponse` impl reads
    /// this to stamp error bodies with the same id that went out on the response header.
    pub static CORRELATION_ID: String;
}

/// Returns the current request's correlation id, if called from within a task spawned by
/// `correlation_id` (i.e. from inside an HTTP handler). Outside that scope (tests calling
/// into `WeaverError` directly) this is `None`.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

pub async fn correlation_id(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(&CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);

    let Ok(value) = HeaderValue::from_str(&correlation_id) else {
        return CORRELATION_ID
            .scope(correlation_id.clone(), next.run(request).instrument(span))
            .await;
    };
    request.headers_mut().insert(CORRELATION_HEADER.clone(), value.clone());
    let mut response = CORRELATION_ID
        .scope(correlation_id.clone(), next.run(request).instrument(span))
        .await;
    response.headers_mut().insert(CORRELATION_HEADER.clone(), value);
    response
}
