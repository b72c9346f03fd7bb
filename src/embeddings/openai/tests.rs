use super::*;
use crate::config::EmbeddingConfig;
use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(url: &str, key_env: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        url: url.to_string(),
        model: "test-embed".to_string(),
        dimension: 8,
        batch_size: 16,
        api_key_env: key_env.to_string(),
        ..EmbeddingConfig::default()
    }
}

fn set_key(name: &str, value: &str) {
    // SAFETY: tests touching process env are serialized with #[serial]
    unsafe { std::env::set_var(name, value) };
}

#[test]
#[serial]
fn missing_api_key_is_credential_error() {
    let config = test_config("http://localhost:9999", "ASKDOCS_TEST_KEY_UNSET");

    assert!(matches!(
        OpenAiEmbedder::new(&config),
        Err(RagError::InvalidCredential(_))
    ));
}

#[tokio::test]
#[serial]
async fn embeddings_roundtrip_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "embedding": vec![0.2; 8], "index": 1 },
                { "embedding": vec![0.1; 8], "index": 0 },
            ]
        })))
        .mount(&server)
        .await;

    set_key("ASKDOCS_TEST_KEY", "sk-test");
    let client =
        OpenAiEmbedder::new(&test_config(&server.uri(), "ASKDOCS_TEST_KEY")).expect("client ok");

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = client.embed_batch(&texts).expect("embed ok");

    assert_eq!(vectors.len(), 2);
    // Results are reordered by the returned index field
    assert!((vectors[0][0] - 0.1).abs() < f32::EPSILON);
    assert!((vectors[1][0] - 0.2).abs() < f32::EPSILON);
}

#[tokio::test]
#[serial]
async fn rejected_key_is_credential_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    set_key("ASKDOCS_TEST_KEY", "sk-bad");
    let client =
        OpenAiEmbedder::new(&test_config(&server.uri(), "ASKDOCS_TEST_KEY")).expect("client ok");

    let result = client.embed("text");
    assert!(matches!(result, Err(RagError::InvalidCredential(_))));
}

#[tokio::test]
#[serial]
async fn count_mismatch_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": vec![0.1; 8], "index": 0 }]
        })))
        .mount(&server)
        .await;

    set_key("ASKDOCS_TEST_KEY", "sk-test");
    let client =
        OpenAiEmbedder::new(&test_config(&server.uri(), "ASKDOCS_TEST_KEY")).expect("client ok");

    let texts = vec!["first".to_string(), "second".to_string()];
    let result = client.embed_batch(&texts);
    assert!(matches!(result, Err(RagError::EmbeddingUnavailable(_))));
}
