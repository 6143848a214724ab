use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{Item, KeyValueStore, QueryPage, QueryRequest, StoreError, UpdateRequest};

/// Sleep schedule between attempts: `initial`, doubling, never above `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub retries: usize,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial: Duration::from_millis(50),
            ceiling: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn schedule(&self) -> impl Iterator<Item = Duration> {
        let ceiling = self.ceiling;
        std::iter::successors(Some(self.initial.min(ceiling)), move |delay| {
            Some(delay.saturating_mul(2).min(ceiling))
        })
        .take(self.retries)
    }
}

/// Retries throttled store calls following a [`BackoffPolicy`].
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    backoff: BackoffPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, backoff: BackoffPolicy) -> Self {
        Self { inner, backoff }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn attempt<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut delays = self.backoff.schedule().enumerate();
        loop {
            match call().await {
                Err(err) if err.is_retryable() => {
                    let Some((retry, delay)) = delays.next() else {
                        return Err(err);
                    };
                    warn!(op, retry, delay_ms = delay.as_millis() as u64, error = %err, "store call throttled");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for RetryingStore<S> {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        self.attempt("get", || self.inner.get(table, key)).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage, StoreError> {
        self.attempt("query", || self.inner.query(request)).await
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.attempt("put", || self.inner.put(table, item.clone())).await
    }

    async fn update(&self, request: &UpdateRequest) -> Result<Item, StoreError> {
        self.attempt("update", || self.inner.update(request)).await
    }

    async fn delete(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        self.attempt("delete", || self.inner.delete(table, key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::memory::MemoryStore;
    use crate::tables::{Model, TableNames};

    struct Flaky {
        inner: MemoryStore,
        throttle_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for Flaky {
        async fn get(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.throttle_first {
                return Err(StoreError::Throttled(table.to_string()));
            }
            self.inner.get(table, key).await
        }
        async fn query(&self, request: &QueryRequest) -> Result<QueryPage, StoreError> {
            self.inner.query(request).await
        }
        async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
            self.inner.put(table, item).await
        }
        async fn update(&self, request: &UpdateRequest) -> Result<Item, StoreError> {
            self.inner.update(request).await
        }
        async fn delete(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
            self.inner.delete(table, key).await
        }
    }

    fn fast_policy(retries: usize) -> BackoffPolicy {
        BackoffPolicy {
            retries,
            initial: Duration::from_millis(1),
            ceiling: Duration::from_millis(2),
        }
    }

    #[test]
    fn schedule_doubles_up_to_ceiling() {
        let policy = BackoffPolicy {
            retries: 5,
            initial: Duration::from_millis(100),
            ceiling: Duration::from_millis(350),
        };
        let delays: Vec<u128> = policy.schedule().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);
        assert_eq!(BackoffPolicy { retries: 0, ..policy }.schedule().count(), 0);
    }

    #[tokio::test]
    async fn throttled_calls_are_retried_until_success() {
        let names = TableNames::default();
        let store = RetryingStore::new(
            Flaky {
                inner: MemoryStore::for_tables(&names),
                throttle_first: 2,
                calls: AtomicUsize::new(0),
            },
            fast_policy(3),
        );
        let got = store.get(&names.table(Model::Game), "G1").await.unwrap();
        assert!(got.is_none());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_give_up_after_budget() {
        let names = TableNames::default();
        let store = RetryingStore::new(
            Flaky {
                inner: MemoryStore::for_tables(&names),
                throttle_first: 10,
                calls: AtomicUsize::new(0),
            },
            fast_policy(2),
        );
        let err = store.get(&names.table(Model::Game), "G1").await.unwrap_err();
        assert!(matches!(err, StoreError::Throttled(_)));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn only_throttling_is_retryable() {
        assert!(StoreError::Throttled("t".into()).is_retryable());
        assert!(!StoreError::Backend("down".into()).is_retryable());
        assert!(!StoreError::ConditionFailed {
            table: "t".into(),
            key: "k".into()
        }
        .is_retryable());
    }
}
