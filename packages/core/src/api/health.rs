use axum::{http::header, response::IntoResponse};

/// Liveness check; never cached.
pub async fn health() -> impl IntoResponse {
    ([(header::CACHE_CONTROL, "no-store")], "ok")
}
