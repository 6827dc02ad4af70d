//! Reopening stores from disk, including damaged ones.

use crate::common;
use content_memory::{IndexState, MemoryService};
use tempfile::TempDir;

#[tokio::test]
async fn texts_survive_a_restart() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());

    {
        let service = MemoryService::from_settings(&settings).unwrap();
        service
            .add_text("quarterly product update", Some("update".into()), None)
            .await
            .unwrap();
        service
            .add_texts(
                &["hiring announcement for engineers", "holiday greetings"],
                Some(vec!["hiring".into(), "holiday".into()]),
                None,
            )
            .await
            .unwrap();
    }

    let reopened = MemoryService::from_settings(&settings).unwrap();
    let stats = reopened.statistics();
    assert_eq!(stats.id_map_entries, 3);
    assert!(stats.is_consistent());

    let hits = reopened
        .search_text("quarterly product update", 1, 0.9)
        .await
        .unwrap();
    assert_eq!(hits[0].content_id, "update");
    assert_eq!(
        reopened.get("hiring").unwrap().metadata["text"],
        "hiring announcement for engineers"
    );
}

#[tokio::test]
async fn deferred_removal_is_still_pending_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());

    {
        let service = MemoryService::from_settings(&settings).unwrap();
        service
            .add_texts(&["alpha post", "beta post"], Some(vec!["a".into(), "b".into()]), None)
            .await
            .unwrap();
        assert!(service.remove("a", false).unwrap());
    }

    let reopened = MemoryService::from_settings(&settings).unwrap();
    let stats = reopened.statistics();
    assert_eq!(stats.state, IndexState::NeedsRebuild);
    assert_eq!(stats.ghost_entries, 1);
    assert!(!reopened.contains("a"));

    reopened.rebuild().unwrap();
    assert!(reopened.statistics().is_consistent());
}

#[tokio::test]
async fn corrupt_files_start_empty_instead_of_failing() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());

    {
        let service = MemoryService::from_settings(&settings).unwrap();
        service
            .add_texts(&["one", "two"], None, None)
            .await
            .unwrap();
    }
    for file in ["metadata.json", "id_map.json", "vectors.json", "index.bin"] {
        std::fs::write(settings.store.path.join(file), b"\0\0 definitely not valid").unwrap();
    }

    let reopened = MemoryService::from_settings(&settings).unwrap();
    let stats = reopened.statistics();
    assert_eq!(stats.id_map_entries, 0);
    assert_eq!(stats.total_vectors, 0);
    assert_eq!(stats.state, IndexState::NeedsRebuild);

    // Fully usable once rebuilt
    reopened.rebuild().unwrap();
    reopened.add_text("fresh start", None, None).await.unwrap();
    assert!(reopened.statistics().is_consistent());
}

#[tokio::test]
async fn lost_index_file_is_recovered_by_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());

    {
        let service = MemoryService::from_settings(&settings).unwrap();
        service
            .add_text("evergreen content", Some("keep".into()), None)
            .await
            .unwrap();
    }
    std::fs::remove_file(settings.store.path.join("index.bin")).unwrap();

    let reopened = MemoryService::from_settings(&settings).unwrap();
    assert!(reopened.statistics().needs_rebuild);
    assert!(reopened.add_text("blocked", None, None).await.is_err());

    reopened.rebuild().unwrap();
    let hits = reopened
        .search_text("evergreen content", 1, 0.9)
        .await
        .unwrap();
    assert_eq!(hits[0].content_id, "keep");
}

#[test]
fn index_older_than_records_never_misattributes_hits() {
    let temp_dir = TempDir::new().unwrap();
    let settings = common::hash_settings(temp_dir.path());
    let index_path = settings.store.path.join("index.bin");

    let stale_index = {
        let service = MemoryService::from_settings(&settings).unwrap();
        service
            .add_vectors(
                &[common::axis(0), common::axis(1), common::axis(2)],
                Some(vec!["a".into(), "b".into(), "c".into()]),
                None,
            )
            .unwrap();
        let stale_index = std::fs::read(&index_path).unwrap();
        assert!(service.remove("b", true).unwrap());
        stale_index
    };
    // The JSON files moved on but the index write was lost
    std::fs::write(&index_path, stale_index).unwrap();

    let reopened = MemoryService::from_settings(&settings).unwrap();
    assert!(reopened.statistics().needs_rebuild);
    let hits = reopened.search_vector(&common::axis(1), 3, 0.5).unwrap();
    assert!(hits.is_empty(), "{hits:?}");

    reopened.rebuild().unwrap();
    assert!(reopened.search_vector(&common::axis(1), 3, 0.5).unwrap().is_empty());
    let hits = reopened.search_vector(&common::axis(2), 1, 0.5).unwrap();
    assert_eq!(hits[0].content_id, "c");
    assert!(reopened.statistics().is_consistent());
}
