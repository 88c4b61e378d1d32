//! services/app/src/adapters/timeout.rs
//!
//! Decorators that put a deadline on every backend call and retry the reads
//! that are safe to repeat. They wrap any `AuthProvider` or `DocumentStore`,
//! so the stores above them never see a call that hangs forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use humonix_core::domain::IdentityId;
use humonix_core::ports::{
    AuthProvider, Document, DocumentListener, DocumentStore, IdentityStream, PortError,
    PortResult, Query, QueryListener, StoredDocument, Subscription,
};
use tracing::warn;

use crate::config::Config;

/// How long a backend call may take and how often an idempotent read is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub read_retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.gateway_timeout,
            read_retries: config.read_retries,
            backoff: config.retry_backoff,
        }
    }

    /// Runs `call` once, failing with `PortError::Timeout` when it overruns.
    pub async fn bounded<T, F>(&self, call: F) -> PortResult<T>
    where
        F: Future<Output = PortResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Timeout(self.timeout)),
        }
    }

    /// Runs `call` under the deadline, retrying transient failures with a
    /// linearly growing backoff.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, call: F) -> PortResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PortResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(call()).await {
                Err(e) if e.is_transient() && attempt < self.read_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {} of {}",
                        operation, e, attempt, self.read_retries
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                result => return result,
            }
        }
    }
}

//=========================================================================================
// Auth Provider Decorator
//=========================================================================================

pub struct TimeoutAuthProvider {
    inner: Arc<dyn AuthProvider>,
    policy: CallPolicy,
}

impl TimeoutAuthProvider {
    pub fn new(inner: Arc<dyn AuthProvider>, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl AuthProvider for TimeoutAuthProvider {
    async fn create_identity(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        self.policy
            .bounded(self.inner.create_identity(email, password))
            .await
    }

    async fn authenticate(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        self.policy
            .bounded(self.inner.authenticate(email, password))
            .await
    }

    async fn update_display_name(&self, identity: &IdentityId, name: &str) -> PortResult<()> {
        self.policy
            .bounded(self.inner.update_display_name(identity, name))
            .await
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.policy.bounded(self.inner.sign_out()).await
    }

    async fn current_identity(&self) -> PortResult<Option<IdentityId>> {
        self.policy
            .with_retry("current_identity", || self.inner.current_identity())
            .await
    }

    fn identity_changes(&self) -> IdentityStream {
        self.inner.identity_changes()
    }
}

//=========================================================================================
// Document Store Decorator
//=========================================================================================

pub struct TimeoutDocumentStore {
    inner: Arc<dyn DocumentStore>,
    policy: CallPolicy,
}

impl TimeoutDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl DocumentStore for TimeoutDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        self.policy
            .with_retry("get", || self.inner.get(collection, id))
            .await
    }

    async fn set(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        self.policy.bounded(self.inner.set(collection, id, fields)).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        self.policy
            .bounded(self.inner.update(collection, id, fields))
            .await
    }

    async fn add(&self, collection: &str, fields: Document) -> PortResult<String> {
        self.policy.bounded(self.inner.add(collection, fields)).await
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        self.policy
            .with_retry("query", || self.inner.query(query))
            .await
    }

    async fn watch_document(
        &self,
        collection: &str,
        id: &str,
        listener: DocumentListener,
    ) -> PortResult<Subscription> {
        self.policy
            .bounded(self.inner.watch_document(collection, id, listener))
            .await
    }

    async fn watch_query(&self, query: Query, listener: QueryListener) -> PortResult<Subscription> {
        self.policy
            .bounded(self.inner.watch_query(query, listener))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryDocumentStore;
    use serde_json::json;

    /// A store whose every call hangs.
    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn get(&self, _: &str, _: &str) -> PortResult<Option<Document>> {
            std::future::pending().await
        }
        async fn set(&self, _: &str, _: &str, _: Document) -> PortResult<()> {
            std::future::pending().await
        }
        async fn update(&self, _: &str, _: &str, _: Document) -> PortResult<()> {
            std::future::pending().await
        }
        async fn add(&self, _: &str, _: Document) -> PortResult<String> {
            std::future::pending().await
        }
        async fn query(&self, _: &Query) -> PortResult<Vec<StoredDocument>> {
            std::future::pending().await
        }
        async fn watch_document(
            &self,
            _: &str,
            _: &str,
            _: DocumentListener,
        ) -> PortResult<Subscription> {
            std::future::pending().await
        }
        async fn watch_query(&self, _: Query, _: QueryListener) -> PortResult<Subscription> {
            std::future::pending().await
        }
    }

    fn policy(retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(20),
            read_retries: retries,
            backoff: Duration::from_millis(1),
        }
    }

    fn fields() -> Document {
        match json!({ "mood": "calm" }) {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[tokio::test]
    async fn stalled_calls_time_out() {
        let store = TimeoutDocumentStore::new(Arc::new(StalledStore), policy(0));
        assert_eq!(
            store.set("moods", "m1", fields()).await,
            Err(PortError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(
            store.get("moods", "m1").await,
            Err(PortError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn reads_retry_transient_failures() {
        let memory = MemoryDocumentStore::default();
        memory.set("moods", "m1", fields()).await.unwrap();
        memory.fail_next(PortError::TransientNetworkFailure("reset".into()));
        memory.fail_next(PortError::TransientNetworkFailure("reset".into()));

        let store = TimeoutDocumentStore::new(Arc::new(memory), policy(2));
        assert_eq!(store.get("moods", "m1").await, Ok(Some(fields())));
    }

    #[tokio::test]
    async fn writes_are_not_retried() {
        let memory = MemoryDocumentStore::default();
        memory.fail_next(PortError::TransientNetworkFailure("reset".into()));

        let store = TimeoutDocumentStore::new(Arc::new(memory.clone()), policy(2));
        assert!(store.add("moods", fields()).await.unwrap_err().is_transient());
        assert_eq!(memory.document_count("moods"), 0);
    }

    #[tokio::test]
    async fn permanent_failures_are_returned_at_once() {
        let memory = MemoryDocumentStore::default();
        memory.fail_next(PortError::InvalidInput("bad".into()));

        let store = TimeoutDocumentStore::new(Arc::new(memory), policy(3));
        assert_eq!(
            store.query(&Query::collection("moods")).await,
            Err(PortError::InvalidInput("bad".into()))
        );
        assert_eq!(store.query(&Query::collection("moods")).await, Ok(Vec::new()));
    }
}
