//! End-to-end service tests against a mocked OpenAI-compatible endpoint.

use content_memory::config::{ProviderKind, RetryConfig};
use content_memory::{MemoryError, MemoryService, Settings};
use httpmock::{Method::POST, MockServer};
use tempfile::TempDir;

fn settings_for(server: &MockServer, dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.store.path = dir.path().join("store");
    settings.store.dimension = 4;
    settings.embedding.provider = ProviderKind::OpenAi;
    settings.embedding.api_base = server.url("");
    settings.embedding.api_key = Some("test-key".to_string());
    settings.embedding.retry = RetryConfig {
        rate_limit_retries: 1,
        base_delay_ms: 1,
        max_delay_ms: 2,
        transient_retries: 1,
        transient_delay_ms: 1,
    };
    settings
}

#[tokio::test]
async fn add_and_search_through_remote_provider() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [ { "index": 0, "embedding": [3.0, 4.0, 0.0, 0.0] } ]
            }));
        })
        .await;

    let temp_dir = TempDir::new().unwrap();
    let service = MemoryService::from_settings(&settings_for(&server, &temp_dir)).unwrap();

    let id = service
        .add_text("remote text", Some("remote".into()), None)
        .await
        .unwrap();
    let hits = service.search_text("same vector", 1, 0.99).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content_id, id);
    assert!((hits[0].score - 1.0).abs() < 1e-3);
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(503).body("overloaded");
        })
        .await;

    let temp_dir = TempDir::new().unwrap();
    let service = MemoryService::from_settings(&settings_for(&server, &temp_dir)).unwrap();
    let before = service.statistics();

    let result = service.add_text("never stored", None, None).await;
    assert!(matches!(result, Err(MemoryError::Embedding(_))));
    // One call plus one transient retry
    mock.assert_hits_async(2).await;

    let batch = service
        .add_texts(&["a", "b"], None, None)
        .await
        .unwrap();
    assert_eq!(batch, vec![None, None]);
    assert_eq!(service.statistics(), before);
}

#[tokio::test]
async fn wrong_dimension_from_provider_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [ { "index": 0, "embedding": [1.0, 0.0] } ]
            }));
        })
        .await;

    let temp_dir = TempDir::new().unwrap();
    let service = MemoryService::from_settings(&settings_for(&server, &temp_dir)).unwrap();

    let result = service.add_text("short vector", None, None).await;
    assert!(matches!(result, Err(MemoryError::Embedding(_))));
    assert_eq!(service.statistics().id_map_entries, 0);
}
