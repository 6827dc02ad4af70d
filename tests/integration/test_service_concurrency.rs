//! Many tasks sharing one service handle.

use crate::common;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_and_searches_stay_consistent() {
    let service = common::hash_service();

    let mut handles = Vec::new();
    for task in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for item in 0..10 {
                let text = format!("task {task} item {item} shares some words");
                service
                    .add_text(&text, Some(format!("t{task}-{item}")), None)
                    .await
                    .unwrap();
                service.search_text(&text, 3, 0.0).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = service.statistics();
    assert_eq!(stats.id_map_entries, 80);
    assert_eq!(stats.total_vectors, 80);
    assert!(stats.is_consistent(), "{stats:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removals_interleaved_with_searches_never_return_removed_ids() {
    let service = common::hash_service();
    let texts: Vec<String> = (0..40).map(|i| format!("post number {i} about launches")).collect();
    let ids: Vec<String> = (0..40).map(|i| format!("p{i}")).collect();
    service
        .add_texts(texts.as_slice(), Some(ids.clone()), None)
        .await
        .unwrap();

    let remover = {
        let service = service.clone();
        let doomed: Vec<String> = ids.iter().step_by(2).cloned().collect();
        tokio::spawn(async move {
            for chunk in doomed.chunks(5) {
                service.remove_batch(chunk).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let searcher = {
        let service = service.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let hits = service
                    .search_text("post number about launches", 40, -1.0)
                    .await
                    .unwrap();
                // Every hit must still resolve to a live record
                for hit in &hits {
                    assert!(hit.metadata.contains_key("text"));
                }
                tokio::task::yield_now().await;
            }
        })
    };

    remover.await.unwrap();
    searcher.await.unwrap();

    let hits = service
        .search_text("post number about launches", 40, -1.0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 20);
    assert!(
        hits.iter()
            .all(|hit| hit.content_id[1..].parse::<usize>().unwrap() % 2 == 1)
    );
    assert!(service.statistics().is_consistent());
}

#[tokio::test]
async fn timed_out_embedding_is_never_inserted() {
    let (service, provider) = common::slow_service(Duration::from_secs(30));
    service
        .add_vector(&common::axis(0), Some("existing".into()), None)
        .unwrap();
    let before = service.statistics();

    let single = tokio::time::timeout(
        Duration::from_millis(20),
        service.add_text("slow text", Some("late".into()), None),
    )
    .await;
    assert!(single.is_err());

    let batch = tokio::time::timeout(
        Duration::from_millis(20),
        service.add_texts(&["one", "two"], None, None),
    )
    .await;
    assert!(batch.is_err());

    assert_eq!(provider.started(), 2);
    assert_eq!(service.statistics(), before);
    assert!(!service.contains("late"));

    // No lock is left behind by the dropped futures
    service
        .add_vector(&common::axis(1), Some("after".into()), None)
        .unwrap();
    assert!(service.contains("after"));
}
