use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use mcgate_store::{HttpObjectStore, ObjectStore};
use tokio::net::TcpListener;

async fn object(
    Path((account, container, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if headers.get("x-auth-token").and_then(|v| v.to_str().ok()) != Some("secret") {
        return (StatusCode::UNAUTHORIZED, HeaderMap::new(), Vec::new());
    }
    if account != "AUTH_test" || container != "handler" || object != "resize.mc" {
        return (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new());
    }
    let mut reply = HeaderMap::new();
    reply.insert("x-object-meta-handler-main", "com.example.Resize".parse().unwrap());
    reply.insert("etag", "\"abc123\"".parse().unwrap());
    (StatusCode::OK, reply, b"handler-bytes".to_vec())
}

async fn spawn_store() -> String {
    let app = Router::new().route("/v1/{account}/{container}/{object}", get(object));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

#[tokio::test]
async fn head_and_get_against_http_store() {
    let endpoint = spawn_store().await;
    let store =
        HttpObjectStore::new(&endpoint, Some("secret".into()), Duration::from_secs(5)).unwrap();

    let head = store.head("AUTH_test", "handler", "resize.mc").await.unwrap();
    assert!(head.is_success());
    assert_eq!(
        head.header("X-Object-Meta-Handler-Main"),
        Some("com.example.Resize")
    );
    assert_eq!(head.etag(), Some("abc123"));

    let body = store.get("AUTH_test", "handler", "resize.mc").await.unwrap();
    assert!(body.is_success());
    assert_eq!(body.body, b"handler-bytes");

    let missing = store.head("AUTH_test", "handler", "absent.mc").await.unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn missing_token_is_reported_as_status() {
    let endpoint = spawn_store().await;
    let store = HttpObjectStore::new(&endpoint, None, Duration::from_secs(5)).unwrap();
    let head = store.head("AUTH_test", "handler", "resize.mc").await.unwrap();
    assert_eq!(head.status, 401);
}

#[test]
fn rejects_unusable_endpoint() {
    assert!(HttpObjectStore::new("not a url", None, Duration::from_secs(1)).is_err());
}
