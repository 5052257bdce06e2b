//! Wiremock tests for the Anthropic Messages backend.

use notebase_core::GenerationBackend;
use notebase_inference::{AnthropicBackend, AnthropicConfig};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> AnthropicBackend {
    AnthropicBackend::new(AnthropicConfig {
        base_url: server.uri(),
        api_key: "sk-ant-test".to_string(),
        model: "claude-3-5-haiku-latest".to_string(),
        timeout_seconds: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn generate_joins_text_blocks() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-3-5-haiku-latest",
            "system": "answer from sources",
            "messages": [{"role": "user", "content": "question"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [
                {"type": "text", "text": "part one "},
                {"type": "text", "text": "part two"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .generate_with_system("answer from sources", "question")
        .await
        .unwrap();
    assert_eq!(response, "part one part two");
}

#[tokio::test]
async fn provider_error_message_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend.generate("q").await.unwrap_err();
    assert!(err.to_string().contains("Overloaded"));
}
