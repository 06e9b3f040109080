use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use sift_protocol::ResultMetadata;
use sift_search::{
    AnswerGenerator, ContextChunk, GenerationError, GenerationRequest, HttpGenerator,
};
use std::time::Duration;

async fn cite_first(Json(body): Json<Value>) -> Json<Value> {
    let first = body["context"][0]["chunk_id"].clone();
    Json(json!({
        "answer": format!("answer to {}", body["query"].as_str().unwrap()),
        "cited": [first],
    }))
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/generate")
}

fn request() -> GenerationRequest {
    GenerationRequest {
        query: "why was I charged twice".to_string(),
        context: vec![ContextChunk {
            chunk_id: 42,
            snippet: "duplicate charge on statement".to_string(),
            metadata: ResultMetadata {
                document_id: "c-9".to_string(),
                sequence_index: 0,
                start_offset: 0,
                end_offset: 29,
                source: Default::default(),
            },
        }],
    }
}

#[tokio::test]
async fn remote_generator_round_trip() {
    let endpoint = spawn(Router::new().route("/generate", post(cite_first))).await;
    let generator = HttpGenerator::new(endpoint, Duration::from_secs(2)).unwrap();

    let response = generator.generate(request()).await.unwrap();
    assert_eq!(response.answer, "answer to why was I charged twice");
    assert_eq!(response.cited, vec![42]);
}

#[tokio::test]
async fn server_errors_are_backend_failures() {
    let endpoint = spawn(Router::new().route("/generate", post(broken))).await;
    let generator = HttpGenerator::new(endpoint, Duration::from_secs(2)).unwrap();

    let err = generator.generate(request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Backend(_)), "{err}");
}
