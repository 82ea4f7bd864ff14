//! Lazily-initialised, keyed resource cache.
//!
//! # Responsibilities
//! - Construct a resource the first time its key is requested
//! - Hand every later caller the same instance
//! - Run each cached closer exactly once on `close()`
//!
//! # Design Decisions
//! - One `OnceCell` slot per key, looked up through a per-factory `DashMap`,
//!   so different keys construct concurrently while the same key constructs once
//! - Failed constructions leave nothing behind
//! - A closed factory refuses to make anything

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::observability::metrics;
use crate::resource::error::{CloseError, CloseFailure, ResourceError};
use crate::BoxError;

/// A deferred cleanup action tied to a constructed resource.
pub struct Closer(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>);

impl Closer {
    /// Wrap an async cleanup action.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self(Box::new(move || Box::pin(f()) as BoxFuture<'static, _>))
    }

    /// Wrap a synchronous cleanup action.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::new(move || async move { f() })
    }

    /// Run the cleanup action, consuming the closer.
    pub async fn close(self) -> Result<(), BoxError> {
        (self.0)().await
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closer")
    }
}

/// A constructed resource and its optional closer.
#[derive(Debug)]
pub struct Pair<T> {
    pub conn: T,
    pub closer: Option<Closer>,
}

impl<T> Pair<T> {
    pub fn new(conn: T, closer: Closer) -> Self {
        Self {
            conn,
            closer: Some(closer),
        }
    }

    /// A resource that needs no cleanup.
    pub fn without_closer(conn: T) -> Self {
        Self { conn, closer: None }
    }

    /// Transform the handle, keeping the closer.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Pair<U> {
        Pair {
            conn: f(self.conn),
            closer: self.closer,
        }
    }
}

type Constructor<T> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Pair<T>, ResourceError>> + Send + Sync>;

struct Entry<T> {
    instance: T,
    closer: Mutex<Option<Closer>>,
}

impl<T> Entry<T> {
    fn take_closer(&self) -> Option<Closer> {
        self.closer.lock().take()
    }
}

type Slot<T> = Arc<OnceCell<Entry<T>>>;

struct Inner<T> {
    family: String,
    constructor: Constructor<T>,
    slots: DashMap<String, Slot<T>>,
    closed: AtomicBool,
}

/// Concurrency-safe, lazily-initialising map from a key to a resource.
///
/// Cloning a `Factory` is cheap and yields a handle to the same cache.
pub struct Factory<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("family", &self.inner.family)
            .field("slots", &self.inner.slots.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Factory<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a factory for one resource family.
    ///
    /// `constructor` receives the requested key and is called at most once
    /// per key for as long as it keeps succeeding.
    pub fn new<F, Fut>(family: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Pair<T>, ResourceError>> + Send + 'static,
    {
        let constructor: Constructor<T> = Arc::new(move |key| Box::pin(constructor(key)) as BoxFuture<'static, _>);
        Self {
            inner: Arc::new(Inner {
                family: family.into(),
                constructor,
                slots: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the resource family, used in errors and logs.
    pub fn family(&self) -> &str {
        &self.inner.family
    }

    /// Return the resource for `key`, constructing it on first use.
    pub async fn make(&self, key: &str) -> Result<T, ResourceError> {
        if self.is_closed() {
            return Err(self.closed_error(key));
        }

        if let Some(instance) = self.cached(key) {
            return Ok(instance);
        }

        // The shard guard returned by `entry` is released at the end of this statement.
        let slot = self
            .inner
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        match slot.get_or_try_init(|| self.construct(key)).await {
            Ok(entry) => {
                if self.is_closed() {
                    // Lost a race with close(); nobody else will run this closer.
                    if let Some(closer) = entry.take_closer() {
                        if let Err(e) = closer.close().await {
                            tracing::warn!(family = %self.inner.family, key, error = %e, "Closer failed after factory close");
                        }
                    }
                    return Err(self.closed_error(key));
                }
                Ok(entry.instance.clone())
            }
            Err(err) => {
                // Drop the empty slot unless another caller is still waiting on it.
                self.inner
                    .slots
                    .remove_if(key, |_, s| s.get().is_none() && Arc::strong_count(s) <= 2);
                Err(err)
            }
        }
    }

    fn cached(&self, key: &str) -> Option<T> {
        let slot = self.inner.slots.get(key)?;
        slot.get().map(|entry| entry.instance.clone())
    }

    async fn construct(&self, key: &str) -> Result<Entry<T>, ResourceError> {
        tracing::debug!(family = %self.inner.family, key, "Constructing resource");
        match (self.inner.constructor)(key.to_string()).await {
            Ok(pair) => {
                metrics::record_construction(&self.inner.family);
                Ok(Entry {
                    instance: pair.conn,
                    closer: Mutex::new(pair.closer),
                })
            }
            Err(err) => {
                metrics::record_construction_failure(&self.inner.family);
                tracing::warn!(family = %self.inner.family, key, error = %err, "Resource construction failed");
                Err(err)
            }
        }
    }

    fn closed_error(&self, key: &str) -> ResourceError {
        ResourceError::Closed {
            family: self.inner.family.clone(),
            key: key.to_string(),
        }
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether `key` has a ready entry.
    pub fn contains(&self, key: &str) -> bool {
        self.cached(key).is_some()
    }

    /// Keys with ready entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .slots
            .iter()
            .filter(|r| r.value().initialized())
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|r| r.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every cached closer once, in key order.
    ///
    /// A failing closer does not stop the rest. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), CloseError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut slots: Vec<(String, Slot<T>)> = self
            .inner
            .slots
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        self.inner.slots.clear();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failures = Vec::new();
        for (key, slot) in slots {
            let Some(closer) = slot.get().and_then(Entry::take_closer) else {
                continue;
            };
            match closer.close().await {
                Ok(()) => tracing::debug!(family = %self.inner.family, key = %key, "Resource closed"),
                Err(source) => {
                    tracing::error!(family = %self.inner.family, key = %key, error = %source, "Resource closer failed");
                    metrics::record_closer_failure();
                    failures.push(CloseFailure { name: key, source });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseError {
                family: self.inner.family.clone(),
                failures,
            })
        }
    }

    /// A closer that closes this factory, for registration on a shutdown list.
    pub fn closer(&self) -> Closer {
        let factory = self.clone();
        Closer::new(move || async move { factory.close().await.map_err(BoxError::from) })
    }
}

/// Something that makes `T` by name.
///
/// Consumers depend on this instead of a concrete factory.
pub trait Maker<T>: Send + Sync {
    fn make<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<T, ResourceError>>;
}

impl<T> Maker<T> for Factory<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn make<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<T, ResourceError>> {
        Box::pin(Factory::make(self, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_factory(counter: Arc<AtomicUsize>) -> Factory<Arc<String>> {
        Factory::new("test", move |key: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Pair::without_closer(Arc::new(key)))
            }
        })
    }

    #[tokio::test]
    async fn test_make_is_memoized() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(counter.clone());

        let a = factory.make("default").await.unwrap();
        let b = factory.make("default").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(factory.keys(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn test_single_construction_under_contention() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(counter.clone());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let factory = factory.clone();
            handles.push(tokio::spawn(async move { factory.make("shared").await.unwrap() }));
        }

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let factory: Factory<u32> = Factory::new("flaky", move |key: String| {
            let a = a.clone();
            async move {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ResourceError::Construction {
                        family: "flaky".into(),
                        key,
                        source: "connection refused".into(),
                    })
                } else {
                    Ok(Pair::without_closer(7))
                }
            }
        });

        let err = factory.make("db").await.unwrap_err();
        assert_eq!(err.key(), "db");
        assert!(!factory.contains("db"));

        assert_eq!(factory.make("db").await.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_runs_each_closer_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        let factory: Factory<String> = Factory::new("once", move |key: String| {
            let c = c.clone();
            async move {
                Ok(Pair::new(
                    key,
                    Closer::sync(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                ))
            }
        });

        factory.make("a").await.unwrap();
        factory.make("b").await.unwrap();
        factory.close().await.unwrap();
        factory.close().await.unwrap();

        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_make_after_close_fails() {
        let factory = counting_factory(Arc::new(AtomicUsize::new(0)));
        factory.make("default").await.unwrap();
        factory.close().await.unwrap();

        let err = factory.make("default").await.unwrap_err();
        assert!(matches!(err, ResourceError::Closed { .. }));
        assert!(factory.is_empty());
    }
}
