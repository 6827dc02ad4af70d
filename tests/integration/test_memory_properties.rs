//! Store-level guarantees exercised through the public service API.

use crate::common::{self, axis, vector_for};
use content_memory::embedding::ProviderError;
use content_memory::{MemoryError, MemoryService, SearchHit};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn ids(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|hit| hit.content_id.as_str()).collect()
}

#[test]
fn stored_vectors_are_unit_length_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());
    let service = MemoryService::from_settings(&settings).unwrap();

    let vectors: Vec<Vec<f32>> = (0..20).map(vector_for).collect();
    service.add_vectors(&vectors, None, None).unwrap();

    let raw = std::fs::read_to_string(settings.store.path.join("vectors.json")).unwrap();
    let stored: BTreeMap<String, Vec<f32>> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.len(), 20);
    for vector in stored.values() {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-3, "norm {norm} is off unit length");
    }
}

#[test]
fn added_vector_finds_itself() {
    let service = common::hash_service();
    for seed in 0..10 {
        service
            .add_vector(&vector_for(seed), Some(format!("item-{seed}")), None)
            .unwrap();
    }

    for seed in 0..10 {
        let hits = service.search_vector(&vector_for(seed), 1, 1.0 - 1e-3).unwrap();
        assert_eq!(ids(&hits), vec![format!("item-{seed}").as_str()]);
        assert!((hits[0].score - 1.0).abs() < 1e-3);
    }
}

#[test]
fn rebuild_twice_is_idempotent() {
    let service = common::hash_service();
    let vectors: Vec<Vec<f32>> = (0..12).map(vector_for).collect();
    let content_ids: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
    service
        .add_vectors(&vectors, Some(content_ids), None)
        .unwrap();
    service.remove("c3", false).unwrap();
    service.remove("c7", false).unwrap();

    service.rebuild().unwrap();
    let stats = service.statistics();
    let hits = service.search_vector(&vector_for(99), 5, -1.0).unwrap();

    service.rebuild().unwrap();
    assert_eq!(service.statistics(), stats);
    assert_eq!(service.search_vector(&vector_for(99), 5, -1.0).unwrap(), hits);
}

#[test]
fn removal_and_rebuild_drop_the_record() {
    let service = common::hash_service();
    for i in 0..4 {
        service
            .add_vector(&axis(i), Some(format!("a{i}")), None)
            .unwrap();
    }
    let before = service.statistics().total_vectors;

    assert!(service.remove("a2", false).unwrap());
    service.rebuild().unwrap();

    let hits = service.search_vector(&axis(2), 4, 0.5).unwrap();
    assert!(hits.is_empty());
    assert_eq!(service.statistics().total_vectors, before - 1);
    assert!(!service.contains("a2"));
}

#[tokio::test]
async fn failed_batch_embedding_leaves_store_unchanged() {
    let (service, provider) = common::failing_service(ProviderError::Transient("down".into()));
    service
        .add_vector(&axis(0), Some("existing".into()), None)
        .unwrap();
    let before = service.statistics();

    let results = service
        .add_texts(&["one", "two", "three"], None, None)
        .await
        .unwrap();

    assert_eq!(results, vec![None, None, None]);
    assert_eq!(service.statistics(), before);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn failed_single_embedding_is_an_error() {
    let (service, _) = common::failing_service(ProviderError::Fatal("401".into()));
    let before = service.statistics();

    let result = service.add_text("hello", None, None).await;
    assert!(matches!(result, Err(MemoryError::Embedding(_))));
    assert_eq!(service.statistics(), before);
}

#[test]
fn invalid_vector_in_batch_rejects_whole_batch() {
    let service = common::hash_service();
    let before = service.statistics();

    let mut vectors: Vec<Vec<f32>> = (0..5).map(vector_for).collect();
    vectors[3] = vec![1.0; common::DIM - 1];

    assert!(matches!(
        service.add_vectors(&vectors, None, None),
        Err(MemoryError::DimensionMismatch { .. })
    ));
    assert_eq!(service.statistics(), before);
}

#[test]
fn rebuild_always_leaves_no_inconsistencies() {
    let service = common::hash_service();
    let mut live: Vec<String> = Vec::new();
    let mut state = 7u64;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        state >> 33
    };

    for step in 0..60u64 {
        match next() % 5 {
            0 => {
                let id = format!("s{step}");
                service
                    .add_vector(&vector_for(step), Some(id.clone()), None)
                    .unwrap();
                live.push(id);
            }
            1 => {
                let vectors = vec![vector_for(step), vector_for(step + 1000)];
                let batch_ids = vec![format!("b{step}a"), format!("b{step}b")];
                service
                    .add_vectors(&vectors, Some(batch_ids.clone()), None)
                    .unwrap();
                live.extend(batch_ids);
            }
            2 if !live.is_empty() => {
                let id = live.remove((next() as usize) % live.len());
                assert!(service.remove(&id, false).unwrap());
            }
            3 if live.len() >= 2 => {
                let first = live.remove(0);
                let second = live.remove(0);
                assert_eq!(service.remove_batch(&[first, second]).unwrap(), 2);
                assert!(service.statistics().inconsistencies.is_empty());
            }
            _ => {
                service.rebuild().unwrap();
                let stats = service.statistics();
                assert!(stats.inconsistencies.is_empty(), "{stats:?}");
                assert_eq!(stats.total_vectors, live.len());
            }
        }
    }

    service.rebuild().unwrap();
    let stats = service.statistics();
    assert!(stats.is_consistent());
    assert_eq!(stats.id_map_entries, live.len());
    assert_eq!(stats.metadata_entries, live.len());
    assert_eq!(stats.vector_entries, live.len());
}

#[test]
fn remove_batch_scenario_never_returns_removed_id() {
    let service = common::hash_service();
    let mut b = axis(0);
    b[1] = 0.5;
    let mut c = axis(0);
    c[2] = 1.0;
    service
        .add_vectors(
            &[axis(0), b, c],
            Some(vec!["a".into(), "b".into(), "c".into()]),
            None,
        )
        .unwrap();

    assert_eq!(service.remove_batch(&["b"]).unwrap(), 1);

    let hits = service.search_vector(&axis(0), 3, 0.0).unwrap();
    let found = ids(&hits);
    assert_eq!(found.len(), 2);
    assert!(found.contains(&"a"));
    assert!(found.contains(&"c"));
    assert!(!found.contains(&"b"));
}

#[test]
fn remove_unknown_id_is_not_an_error() {
    let service = common::hash_service();
    assert!(!service.remove("ghost", true).unwrap());
    assert_eq!(service.remove_batch(&["ghost", "phantom"]).unwrap(), 0);
    assert!(service.statistics().is_consistent());
}

#[test]
fn similar_to_recommends_neighbours() {
    let service = common::hash_service();
    let mut near = axis(0);
    near[1] = 0.2;
    service
        .add_vectors(
            &[axis(0), near, axis(5)],
            Some(vec!["origin".into(), "near".into(), "far".into()]),
            None,
        )
        .unwrap();

    let hits = service.similar_to("origin", 5, 0.5).unwrap();
    assert_eq!(ids(&hits), vec!["near"]);
}
