use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Response as HttpResponse, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use sift_protocol::{codes, serialize_json, ErrorEnvelope, QueryRequest};
use sift_search::{QueryEngine, QueryError};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    vector_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vector_reason: Option<String>,
    keyword_chunks: usize,
}

/// `POST /query`, `GET /health`, `GET /stats`.
pub fn router(engine: Arc<QueryEngine>) -> Router {
    Router::new()
        .route("/query", post(http_query))
        .route("/health", get(http_health))
        .route("/stats", get(http_stats))
        .with_state(engine)
}

pub async fn serve(engine: Arc<QueryEngine>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("Serving queries on http://{}/query", listener.local_addr()?);
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

#[must_use]
pub const fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::InvalidTopK { .. } | QueryError::EmptyQuery | QueryError::InvalidFilters(_) => {
            StatusCode::BAD_REQUEST
        }
        QueryError::NoRetrievalPath { .. } | QueryError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        QueryError::Overloaded { .. } => StatusCode::TOO_MANY_REQUESTS,
        QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn http_query(
    State(engine): State<Arc<QueryEngine>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let request: QueryRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            let envelope = ErrorEnvelope::new(codes::INVALID_REQUEST, err.to_string());
            return build_response(StatusCode::BAD_REQUEST, &envelope);
        }
    };

    match engine.respond(&request).await {
        Ok(response) => build_response(StatusCode::OK, &response),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                log::warn!("Query {:?} failed: {err}", request.query);
            }
            build_response(status, &ErrorEnvelope::new(err.code(), err.to_string()))
        }
    }
}

async fn http_health(State(engine): State<Arc<QueryEngine>>) -> Result<Response, StatusCode> {
    let indexes = engine.indexes();
    let vector_reason = indexes.vectors.unavailable_reason();
    let vector_available = vector_reason.is_none();
    let keyword_chunks = indexes.keywords.len();
    let (status, code) = match (vector_available, keyword_chunks > 0) {
        (true, true) => ("ok", StatusCode::OK),
        (false, false) => ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
        _ => ("degraded", StatusCode::OK),
    };
    let report = HealthReport {
        status,
        vector_available,
        vector_reason,
        keyword_chunks,
    };
    build_response(code, &report)
}

async fn http_stats(State(engine): State<Arc<QueryEngine>>) -> Result<Response, StatusCode> {
    build_response(StatusCode::OK, &engine.stats())
}

fn build_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response, StatusCode> {
    let bytes = serialize_json(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_bytes();
    HttpResponse::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
