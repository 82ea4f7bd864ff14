//! Named resource factory behaviour under concurrency and shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use servekit::resource::{Closer, Factory, KeyedFactoryBuilder, Pair, ResourceError};

mod common;
use common::Journal;

#[derive(Debug)]
struct Conn {
    key: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_construction_under_contention() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let c = constructions.clone();
    let factory: Factory<Arc<Conn>> = Factory::new("db", move |key: String| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Pair::without_closer(Arc::new(Conn { key })))
        }
    });

    let mut handles = Vec::new();
    for _ in 0..64 {
        let factory = factory.clone();
        handles.push(tokio::spawn(async move { factory.make("primary").await.unwrap() }));
    }

    let mut conns = Vec::new();
    for handle in handles {
        conns.push(handle.await.unwrap());
    }

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    assert_eq!(conns[0].key, "primary");
    assert_eq!(factory.keys(), vec!["primary".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_construct_independently() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let c = constructions.clone();
    let factory: Factory<String> = Factory::new("db", move |key: String| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Pair::without_closer(key))
        }
    });

    let mut handles = Vec::new();
    for i in 0..16 {
        let factory = factory.clone();
        handles.push(tokio::spawn(async move { factory.make(&format!("k{}", i % 4)).await.unwrap() }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(constructions.load(Ordering::SeqCst), 4);
    assert_eq!(factory.len(), 4);
}

#[tokio::test]
async fn test_close_aggregates_every_failure() {
    let journal = Journal::new();
    let j = journal.clone();
    let factory: Factory<u32> = Factory::new("queue", move |key: String| {
        let j = j.clone();
        async move {
            let n: u32 = key.parse().unwrap();
            let closer = Closer::sync(move || {
                j.record(format!("close {n}"));
                if n == 2 {
                    Err("broker refused".into())
                } else {
                    Ok(())
                }
            });
            Ok(Pair::new(n, closer))
        }
    });

    for key in ["1", "2", "3"] {
        factory.make(key).await.unwrap();
    }

    let err = factory.close().await.unwrap_err();
    assert_eq!(err.family, "queue");
    assert_eq!(err.keys().collect::<Vec<_>>(), vec!["2"]);
    assert!(err.to_string().contains("broker refused"));

    let mut closed = journal.entries();
    closed.sort();
    assert_eq!(closed, vec!["close 1", "close 2", "close 3"]);

    // Closing again runs nothing.
    assert!(factory.close().await.is_ok());
    assert_eq!(journal.entries().len(), 3);

    assert!(matches!(factory.make("1").await, Err(ResourceError::Closed { .. })));
}

#[tokio::test]
async fn test_unconfigured_key_is_not_cached() {
    let configs = HashMap::from([("primary".to_string(), "127.0.0.1:5432".to_string())]);
    let factory = KeyedFactoryBuilder::new("db", configs)
        .build(|_, addr: String| async move { Ok(Pair::without_closer(addr)) });

    let err = factory.make("replica").await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.key(), "replica");
    assert!(!factory.contains("replica"));

    assert_eq!(factory.make("primary").await.unwrap(), "127.0.0.1:5432");
}
