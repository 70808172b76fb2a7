mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use credstore_core::error::CredstoreError;
use credstore_datastore::auth::{AuthorizedUser, MetadataServer, TokenSource};
use serde_json::json;

async fn token_endpoint(
    State(calls): State<Arc<AtomicUsize>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    calls.fetch_add(1, Ordering::SeqCst);
    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return common::error(StatusCode::BAD_REQUEST, "unsupported_grant_type");
    }
    if form.get("refresh_token").map(String::as_str) != Some("1//refresh") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Bad Request" })),
        )
            .into_response();
    }
    assert_eq!(form["client_id"], "client.apps.googleusercontent.com");
    Json(json!({
        "access_token": "ya29.fresh",
        "expires_in": 3599,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn token_server() -> (Arc<AtomicUsize>, String) {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .with_state(calls.clone());
    let base = common::serve(app).await;
    (calls, format!("{base}/token"))
}

fn user(refresh_token: &str) -> AuthorizedUser {
    AuthorizedUser::new(
        "client.apps.googleusercontent.com".to_string(),
        "secret".to_string(),
        refresh_token.to_string(),
    )
}

#[tokio::test]
async fn test_refresh_token_exchanged_once() {
    let (calls, url) = token_server().await;
    let source = user("1//refresh").with_token_url(url);

    assert_eq!(source.access_token().await.unwrap(), "ya29.fresh");
    assert_eq!(source.access_token().await.unwrap(), "ya29.fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_refresh_is_http_error() {
    let (_calls, url) = token_server().await;
    let source = user("1//revoked").with_token_url(url);

    match source.access_token().await {
        Err(CredstoreError::Http { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

async fn metadata_endpoint(headers: HeaderMap) -> Response {
    if headers.get("metadata-flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
        return (StatusCode::FORBIDDEN, "Missing Metadata-Flavor:Google header").into_response();
    }
    Json(json!({ "access_token": "ya29.metadata", "expires_in": 1800, "token_type": "Bearer" }))
        .into_response()
}

#[tokio::test]
async fn test_metadata_server_token() {
    let path = "/computeMetadata/v1/instance/service-accounts/default/token";
    let base = common::serve(Router::new().route(path, get(metadata_endpoint))).await;
    let source = MetadataServer::with_url(format!("{base}{path}"));

    assert_eq!(source.access_token().await.unwrap(), "ya29.metadata");
}

#[tokio::test]
async fn test_metadata_server_unreachable() {
    // nothing listens on port 9 locally
    let source = MetadataServer::with_url("http://127.0.0.1:9/token");
    assert!(matches!(
        source.access_token().await,
        Err(CredstoreError::Auth(_))
    ));
}
