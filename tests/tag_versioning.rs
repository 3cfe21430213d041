//! Cache tag versioning against the in-memory store

use std::sync::Arc;
use tripguard::cache::{TagVersions, format_versioned_key};
use tripguard::metrics::Metrics;
use tripguard::store::{KvStore, MemoryStore};
use tripguard::telemetry::Telemetry;

fn versions() -> (TagVersions, MemoryStore) {
    let store = MemoryStore::new();
    let tags = TagVersions::new(Some(Arc::new(store.clone())), Telemetry::default());
    (tags, store)
}

#[tokio::test]
async fn absent_tag_reads_as_version_one() {
    let (tags, _) = versions();
    assert_eq!(tags.get_tag_version("never-bumped").await, 1);
    assert_eq!(
        tags.versioned_key("never-bumped", "q:rome").await,
        "never-bumped:v1:q:rome"
    );
}

#[tokio::test]
async fn n_bumps_yield_version_n_plus_one() {
    let (tags, _) = versions();
    for n in 1..=5u64 {
        assert_eq!(tags.bump_tag("places").await, n + 1);
    }
    assert_eq!(tags.get_tag_version("places").await, 6);
}

#[tokio::test]
async fn concurrent_bumps_never_lose_an_increment() {
    let (tags, _) = versions();
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let tags = tags.clone();
            tokio::spawn(async move { tags.bump_tag("weather").await })
        })
        .collect();

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap());
    }
    seen.sort_unstable();
    seen.dedup();

    assert_eq!(seen.len(), 20, "every bump must observe a distinct version");
    assert_eq!(tags.get_tag_version("weather").await, 21);
}

#[tokio::test]
async fn bump_changes_the_versioned_key() {
    let (tags, _) = versions();
    let before = tags.versioned_key("flights", "sfo-cdg").await;
    tags.bump_tag("flights").await;
    let after = tags.versioned_key("flights", "sfo-cdg").await;

    assert_ne!(before, after);
    assert_eq!(after, format_versioned_key("flights", 2, "sfo-cdg"));
}

#[tokio::test]
async fn garbage_versions_read_as_one() {
    let (tags, store) = versions();
    for raw in ["banana", "-4", "0", "NaN", "inf", ""] {
        store.set("tagver:odd", raw, None).await.unwrap();
        assert_eq!(tags.get_tag_version("odd").await, 1, "raw value {:?}", raw);
    }
    store.set("tagver:odd", "7", None).await.unwrap();
    assert_eq!(tags.get_tag_version("odd").await, 7);
}

#[tokio::test]
async fn bump_tags_reports_each_tag() {
    let store = MemoryStore::new();
    let metrics = Metrics::new().unwrap();
    let tags = TagVersions::new(
        Some(Arc::new(store)),
        Telemetry::default().with_metrics(metrics.clone()),
    );

    tags.bump_tag("a").await;
    let versions = tags.bump_tags(&["a", "b"]).await;

    assert_eq!(versions.get("a"), Some(&3));
    assert_eq!(versions.get("b"), Some(&2));
    assert_eq!(metrics.tag_bumps_count(), 3);
}
