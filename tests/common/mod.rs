//! Common fixtures: an in-process mock upstream serving canned responses

#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Vec<u8>,
}

/// Canned responses keyed by path-and-query, falling back to the bare path
///
/// Anything unregistered answers 404.
#[derive(Debug, Clone, Default)]
pub struct MockUpstream {
    routes: HashMap<String, Route>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(mut self, path: &str, status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                content_type,
                body,
            },
        );
        self
    }

    pub fn json(self, path: &str, value: serde_json::Value) -> Self {
        let body = value.to_string().into_bytes();
        self.route(path, StatusCode::OK, "application/json", body)
    }

    pub fn bytes(self, path: &str, body: impl Into<Vec<u8>>) -> Self {
        self.route(path, StatusCode::OK, "application/octet-stream", body.into())
    }

    pub fn text(self, path: &str, body: &str) -> Self {
        self.route(path, StatusCode::OK, "text/plain", body.as_bytes().to_vec())
    }

    pub fn html(self, path: &str, body: &str) -> Self {
        self.route(path, StatusCode::OK, "text/html; charset=utf-8", body.as_bytes().to_vec())
    }

    pub fn status(self, path: &str, status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.route(path, status, "text/plain", Vec::new())
    }

    /// Start serving on an ephemeral port and return the base URL
    pub async fn serve(self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().expect("Mock upstream has no address");

        let app = Router::new()
            .fallback(respond)
            .with_state(Arc::new(self.routes));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock upstream crashed");
        });

        format!("http://{addr}")
    }
}

async fn respond(State(routes): State<Arc<HashMap<String, Route>>>, uri: Uri) -> Response {
    let full = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path());
    match routes.get(full).or_else(|| routes.get(uri.path())) {
        Some(route) => (
            route.status,
            [(header::CONTENT_TYPE, route.content_type)],
            route.body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A minimal BERT config.json
pub fn bert_config() -> serde_json::Value {
    serde_json::json!({
        "architectures": ["BertForMaskedLM"],
        "model_type": "bert",
        "hidden_size": 768,
        "vocab_size": 30522
    })
}

/// HuggingFace `/api/models/{id}` body listing `files`
pub fn hf_model_info(files: &[&str]) -> serde_json::Value {
    let siblings: Vec<_> = files
        .iter()
        .map(|f| serde_json::json!({ "rfilename": f }))
        .collect();
    serde_json::json!({
        "siblings": siblings,
        "cardData": { "license": "apache-2.0" },
        "tags": ["fill-mask"]
    })
}
