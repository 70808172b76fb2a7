#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use credstore_datastore::auth::{StaticToken, TokenSource};
use serde_json::json;

pub const TOKEN: &str = "test-token";

pub fn token() -> Arc<dyn TokenSource> {
    Arc::new(StaticToken::new(TOKEN))
}

/// Serve `app` on an ephemeral localhost port; returns the base url.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false)
}

/// Middleware: reject requests without the test bearer token.
pub async fn require_token(req: Request, next: Next) -> Response {
    if !authorized(req.headers()) {
        return error(StatusCode::UNAUTHORIZED, "bad token");
    }
    next.run(req).await
}

pub async fn unexpected() -> Response {
    error(StatusCode::BAD_REQUEST, "unexpected request")
}

pub fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
    )
        .into_response()
}
