use std::path::PathBuf;
use std::str::FromStr;

use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use axum_clip::{KnownSize, Ranged};

#[derive(Debug, Clone, Deserialize)]
struct FileRequest {
    path: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let router = Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/file", get(get_file));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, router).await.unwrap();
}

async fn get_file(headers: HeaderMap, Query(request): Query<FileRequest>) -> impl IntoResponse {
    let range = headers.get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match PathBuf::from_str(&request.path) {
        Ok(path) if path.exists() => match KnownSize::path(&path).await {
            Ok(body) => {
                let content_type = body.content_type();
                Ranged::new(range, body, content_type).into_response()
            }
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}")).into_response(),
        },
        _ => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}
