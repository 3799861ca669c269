//! End-to-end behavior of a started change log over the in-process
//! backend: visibility, ordering, caching, durability and pool limits.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use changelog_book::config::ChangeLogConfig;
use changelog_book::domain::{QueryFilter, SubjectId};
use changelog_book::persistence::{MemoryBackend, StoreManager};
use changelog_book::{ChangeLog, ChangeLogError};
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::Instant;

fn subject(name: &str) -> SubjectId {
    let Ok(s) = SubjectId::new(name) else {
        panic!("valid subject {name}");
    };
    s
}

fn config() -> ChangeLogConfig {
    let mut config = ChangeLogConfig::in_memory();
    config.pool.min_idle = 1;
    config.pool.max_size = 2;
    config.pool.acquire_timeout = Duration::from_millis(200);
    config.cache_sweep_interval = None;
    config
}

async fn start(config: &ChangeLogConfig) -> (ChangeLog, MemoryBackend) {
    let backend = MemoryBackend::new();
    let Ok(changelog) =
        ChangeLog::start_with_manager(config, StoreManager::Memory(backend.clone())).await
    else {
        panic!("start failed");
    };
    (changelog, backend)
}

#[tokio::test]
async fn recorded_entry_is_listed_exactly_once() {
    let (changelog, _) = start(&config()).await;
    let service = changelog.service();

    let Ok(_) = service.list(QueryFilter::new()).await else {
        panic!("warm-up list failed");
    };
    let Ok(entry) = service
        .record(subject("steve"), "added", json!({"text": "new map"}))
        .await
    else {
        panic!("record failed");
    };

    for filter in [
        QueryFilter::new(),
        QueryFilter::new().subject(subject("steve")),
        QueryFilter::new().category("added"),
    ] {
        let Ok(listed) = service.list(filter).await else {
            panic!("list failed");
        };
        assert_eq!(listed.iter().filter(|e| e.id == entry.id).count(), 1);
    }
    changelog.shutdown().await;
}

#[tokio::test]
async fn same_subject_entries_list_newest_first() {
    let (changelog, _) = start(&config()).await;
    let service = changelog.service();

    let mut ids = Vec::new();
    for text in ["e1", "e2", "e3"] {
        let Ok(entry) = service.record(subject("alex"), "fix", json!(text)).await else {
            panic!("record failed");
        };
        ids.push(entry.id);
    }
    ids.reverse();

    let Ok(listed) = service
        .list(QueryFilter::new().subject(subject("alex")))
        .await
    else {
        panic!("list failed");
    };
    let listed_ids: Vec<i64> = listed.iter().map(|e| e.id).collect();
    assert_eq!(listed_ids, ids);
    changelog.shutdown().await;
}

#[tokio::test]
async fn repeated_list_is_served_from_cache() {
    let (changelog, backend) = start(&config()).await;
    let service = changelog.service();
    let Ok(_) = service.record(subject("steve"), "fix", json!("x")).await else {
        panic!("record failed");
    };

    let Ok(first) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };
    let reads = backend.reads();
    let Ok(second) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };

    assert_eq!(first, second);
    assert_eq!(backend.reads(), reads);
    changelog.shutdown().await;
}

#[tokio::test]
async fn expired_page_triggers_store_read() {
    let mut config = config();
    config.cache_ttl = Duration::from_millis(100);
    let (changelog, backend) = start(&config).await;
    let service = changelog.service();

    let Ok(_) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };
    let reads = backend.reads();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let Ok(_) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };

    assert_eq!(backend.reads(), reads + 1);
    changelog.shutdown().await;
}

#[tokio::test]
async fn recorded_entry_survives_cache_clear() {
    let (changelog, _) = start(&config()).await;
    let service = changelog.service();
    let Ok(entry) = service.record(subject("steve"), "removed", json!("old")).await else {
        panic!("record failed");
    };

    service.cache().clear().await;
    let Ok(listed) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };
    assert_eq!(listed, vec![entry]);
    changelog.shutdown().await;
}

#[tokio::test]
async fn concurrent_acquisition_beyond_max_size_times_out() {
    let config = config();
    let (changelog, _) = start(&config).await;
    let pool = changelog.service().store().pool();
    let timeout = config.pool.acquire_timeout;
    let hold = timeout * 2;

    let mut acquirers = JoinSet::new();
    for _ in 0..=config.pool.max_size {
        let pool = Arc::clone(pool);
        acquirers.spawn(async move {
            let started = Instant::now();
            match pool.acquire().await {
                Ok(conn) => {
                    tokio::time::sleep(hold).await;
                    drop(conn);
                    Ok(())
                }
                Err(err) => Err((err, started.elapsed())),
            }
        });
    }

    let mut acquired = 0;
    let mut failures = Vec::new();
    while let Some(joined) = acquirers.join_next().await {
        let Ok(outcome) = joined else {
            panic!("acquirer task panicked");
        };
        match outcome {
            Ok(()) => acquired += 1,
            Err(failure) => failures.push(failure),
        }
    }

    assert_eq!(acquired, config.pool.max_size);
    let [(err, waited)] = failures.as_slice() else {
        panic!("expected exactly one failed acquisition, got {}", failures.len());
    };
    assert!(matches!(err, ChangeLogError::PoolExhausted { .. }), "got {err}");
    assert!(*waited >= timeout, "failed after {waited:?}");

    let Ok(_) = pool.acquire().await else {
        panic!("acquire after release failed");
    };
    changelog.shutdown().await;
}

#[tokio::test]
async fn transient_read_failure_is_retried() {
    let (changelog, backend) = start(&config()).await;
    let service = changelog.service();

    backend.fail_next_reads(1);
    assert!(service.list(QueryFilter::new()).await.is_ok());

    backend.fail_next_reads(10);
    let result = service.list(QueryFilter::new().category("fix")).await;
    assert!(matches!(result, Err(ChangeLogError::ReadFailure { .. })));
    changelog.shutdown().await;
}

#[tokio::test]
async fn failed_record_is_reported_and_not_listed() {
    let (changelog, backend) = start(&config()).await;
    let service = changelog.service();

    backend.reject_next_writes(1);
    let result = service.record(subject("steve"), "fix", json!("lost")).await;
    assert!(matches!(result, Err(ChangeLogError::WriteFailure { .. })));

    let Ok(listed) = service.list(QueryFilter::new()).await else {
        panic!("list failed");
    };
    assert!(listed.is_empty());
    changelog.shutdown().await;
}

#[tokio::test]
async fn unseen_count_resets_after_mark_seen() {
    let (changelog, _) = start(&config()).await;
    let service = changelog.service();
    let reader = subject("moderator");

    for category in ["fix", "added"] {
        let Ok(_) = service.record(subject("steve"), category, json!("x")).await else {
            panic!("record failed");
        };
    }
    assert!(matches!(service.unseen_count(&reader, None).await, Ok(2)));
    assert!(matches!(
        service.unseen_count(&reader, Some("fix")).await,
        Ok(1)
    ));

    let Ok(_) = service.mark_seen(&reader).await else {
        panic!("mark_seen failed");
    };
    assert!(matches!(service.unseen_count(&reader, None).await, Ok(0)));
    changelog.shutdown().await;
}
