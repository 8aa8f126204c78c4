use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use crate::api::AppState;

/// Records request counters and adds `X-Process-Time` (seconds).
pub async fn track(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    state.metrics.request_started();

    let mut response = next.run(req).await;

    let elapsed = started.elapsed();
    state.metrics.request_finished(response.status().as_u16(), elapsed);
    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
        response.headers_mut().insert("x-process-time", value);
    }
    response
}
