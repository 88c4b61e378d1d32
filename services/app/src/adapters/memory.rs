//! services/app/src/adapters/memory.rs
//!
//! An in-process backend implementing both the `AuthProvider` and the
//! `DocumentStore` ports. Used for local development and by the test suite.
//! Live feeds are pushed synchronously from inside each write.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use chrono::DateTime;
use humonix_core::domain::IdentityId;
use humonix_core::ports::{
    AuthProvider, Document, DocumentListener, DocumentStore, IdentityStream, PortError,
    PortResult, Query, QueryListener, StoredDocument, Subscription,
};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error};
use uuid::Uuid;

use super::identity_stream;

/// Shortest password the provider accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(EMAIL_PATTERN)
                .map_err(|e| error!("Invalid email pattern: {}", e))
                .ok()
        })
        .as_ref()
}

pub(crate) fn validate_email(email: &str) -> PortResult<()> {
    let valid = match email_pattern() {
        Some(pattern) => pattern.is_match(email),
        None => email.contains('@'),
    };
    if valid {
        Ok(())
    } else {
        Err(PortError::InvalidEmail)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

//=========================================================================================
// Auth Provider
//=========================================================================================

struct Account {
    id: IdentityId,
    password_hash: String,
    display_name: Option<String>,
}

/// An auth provider that keeps accounts in memory with argon2 password hashes.
pub struct MemoryAuthProvider {
    /// Keyed by lowercased email.
    accounts: AsyncMutex<HashMap<String, Account>>,
    current: watch::Sender<Option<IdentityId>>,
    hasher: Argon2<'static>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        // Small memory cost: these hashes never leave the process.
        let params = Params::new(4096, 1, 1, None).unwrap_or_default();
        let (current, _) = watch::channel(None);
        Self {
            accounts: AsyncMutex::new(HashMap::new()),
            current,
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    pub async fn display_name(&self, identity: &IdentityId) -> Option<String> {
        self.accounts
            .lock()
            .await
            .values()
            .find(|account| &account.id == identity)
            .and_then(|account| account.display_name.clone())
    }

    fn switch_to(&self, identity: Option<IdentityId>) {
        self.current.send_if_modified(|current| {
            if *current == identity {
                false
            } else {
                *current = identity;
                true
            }
        });
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn create_identity(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PortError::WeakCredential);
        }

        let key = email.to_lowercase();
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&key) {
            return Err(PortError::DuplicateIdentity);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .hasher
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::TransientNetworkFailure("Failed to hash password".to_string())
            })?
            .to_string();

        let id = IdentityId::new(new_id());
        accounts.insert(
            key,
            Account {
                id: id.clone(),
                password_hash,
                display_name: None,
            },
        );
        drop(accounts);

        debug!("Created identity {} for {}", id, email);
        self.switch_to(Some(id.clone()));
        Ok(id)
    }

    async fn authenticate(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        validate_email(email)?;
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(&email.to_lowercase())
            .ok_or_else(|| PortError::NotFound(format!("No account for {}", email)))?;

        let parsed_hash = PasswordHash::new(&account.password_hash).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            PortError::TransientNetworkFailure("Authentication error".to_string())
        })?;
        if self
            .hasher
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_err()
        {
            return Err(PortError::BadCredential);
        }

        let id = account.id.clone();
        drop(accounts);
        self.switch_to(Some(id.clone()));
        Ok(id)
    }

    async fn update_display_name(&self, identity: &IdentityId, name: &str) -> PortResult<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .values_mut()
            .find(|account| &account.id == identity)
            .ok_or_else(|| PortError::NotFound(format!("Identity {}", identity)))?;
        account.display_name = Some(name.to_string());
        Ok(())
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.switch_to(None);
        Ok(())
    }

    async fn current_identity(&self) -> PortResult<Option<IdentityId>> {
        Ok(self.current.borrow().clone())
    }

    fn identity_changes(&self) -> IdentityStream {
        identity_stream(&self.current)
    }
}

//=========================================================================================
// Document Store
//=========================================================================================

struct Entry {
    fields: Document,
    /// Insertion order, used to break ties between equal sort keys.
    seq: u64,
}

struct DocumentWatcher {
    collection: String,
    id: String,
    listener: DocumentListener,
}

struct QueryWatcher {
    query: Query,
    listener: QueryListener,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, HashMap<String, Entry>>,
    document_watchers: HashMap<u64, DocumentWatcher>,
    query_watchers: HashMap<u64, QueryWatcher>,
    next_watch_id: u64,
    next_seq: u64,
    injected_failures: VecDeque<PortError>,
}

impl Inner {
    fn take_failure(&mut self) -> PortResult<()> {
        match self.injected_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn next_watch_id(&mut self) -> u64 {
        self.next_watch_id += 1;
        self.next_watch_id
    }

    fn current(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.fields.clone())
    }

    fn run_query(&self, query: &Query) -> Vec<StoredDocument> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };

        let mut matches: Vec<(&String, &Entry)> = docs
            .iter()
            .filter(|(_, entry)| match &query.filter {
                Some(filter) => entry.fields.get(&filter.field) == Some(&filter.value),
                None => true,
            })
            .collect();

        matches.sort_by(|(_, a), (_, b)| {
            let by_field = match &query.order_by {
                Some(order) => compare_values(a.fields.get(&order.field), b.fields.get(&order.field)),
                None => Ordering::Equal,
            };
            by_field.then(a.seq.cmp(&b.seq))
        });
        if query.order_by.as_ref().is_some_and(|order| order.descending) {
            matches.reverse();
        }

        matches
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(id, entry)| StoredDocument {
                id: id.clone(),
                fields: entry.fields.clone(),
            })
            .collect()
    }

    /// Pushes the new state of `collection/id` to every interested watcher.
    fn notify(&self, collection: &str, id: &str) {
        let current = self.current(collection, id);
        for watcher in self
            .document_watchers
            .values()
            .filter(|w| w.collection == collection && w.id == id)
        {
            (watcher.listener)(current.clone());
        }
        for watcher in self
            .query_watchers
            .values()
            .filter(|w| w.query.collection == collection)
        {
            (watcher.listener)(self.run_query(&watcher.query));
        }
    }
}

/// Orders numbers numerically and RFC 3339 timestamps chronologically.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// A document store held entirely in process memory.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next store call fail with `error`.
    pub fn fail_next(&self, error: PortError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Removes a document behind the application's back, as an admin console would.
    pub fn delete_document(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            inner.notify(collection, id);
        }
        removed
    }

    /// Number of live feeds currently open against this store.
    pub fn active_watches(&self) -> usize {
        let inner = self.lock();
        inner.document_watchers.len() + inner.query_watchers.len()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, HashMap::len)
    }

    fn release_handle(inner: Weak<Mutex<Inner>>, watch_id: u64) -> Subscription {
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.document_watchers.remove(&watch_id);
                inner.query_watchers.remove(&watch_id);
            }
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let mut inner = self.lock();
        inner.take_failure()?;
        Ok(inner.current(collection, id))
    }

    async fn set(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let seq = inner.next_seq();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Entry { fields, seq });
        inner.notify(collection, id);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let entry = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
        entry.fields.extend(fields);
        inner.notify(collection, id);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Document) -> PortResult<String> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let id = new_id();
        let seq = inner.next_seq();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), Entry { fields, seq });
        inner.notify(collection, &id);
        Ok(id)
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        let mut inner = self.lock();
        inner.take_failure()?;
        Ok(inner.run_query(query))
    }

    async fn watch_document(
        &self,
        collection: &str,
        id: &str,
        listener: DocumentListener,
    ) -> PortResult<Subscription> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let watch_id = inner.next_watch_id();
        listener(inner.current(collection, id));
        inner.document_watchers.insert(
            watch_id,
            DocumentWatcher {
                collection: collection.to_string(),
                id: id.to_string(),
                listener,
            },
        );
        debug!("Opened document watch {} on {}/{}", watch_id, collection, id);
        Ok(Self::release_handle(Arc::downgrade(&self.inner), watch_id))
    }

    async fn watch_query(&self, query: Query, listener: QueryListener) -> PortResult<Subscription> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let watch_id = inner.next_watch_id();
        listener(inner.run_query(&query));
        debug!("Opened query watch {} on {}", watch_id, query.collection);
        inner
            .query_watchers
            .insert(watch_id, QueryWatcher { query, listener });
        Ok(Self::release_handle(Arc::downgrade(&self.inner), watch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[test]
    fn email_validation_matches_the_provider() {
        assert!(validate_email("a@b.com").is_ok());
        assert_eq!(validate_email("a@b"), Err(PortError::InvalidEmail));
        assert_eq!(validate_email("not an email"), Err(PortError::InvalidEmail));
    }

    #[tokio::test]
    async fn signup_rejects_weak_and_duplicate_credentials() {
        let auth = MemoryAuthProvider::new();
        assert_eq!(
            auth.create_identity("a@b.com", "12345").await,
            Err(PortError::WeakCredential)
        );
        assert!(auth.create_identity("a@b.com", "secret1").await.is_ok());
        assert_eq!(
            auth.create_identity("A@B.com", "secret1").await,
            Err(PortError::DuplicateIdentity)
        );
    }

    #[tokio::test]
    async fn authenticate_distinguishes_unknown_email_from_wrong_password() {
        let auth = MemoryAuthProvider::new();
        let id = auth.create_identity("a@b.com", "secret1").await.unwrap();

        assert!(matches!(
            auth.authenticate("x@b.com", "secret1").await,
            Err(PortError::NotFound(_))
        ));
        assert_eq!(
            auth.authenticate("a@b.com", "wrong-pass").await,
            Err(PortError::BadCredential)
        );
        assert_eq!(auth.authenticate("a@b.com", "secret1").await, Ok(id));
    }

    #[tokio::test]
    async fn identity_stream_starts_with_the_current_identity() {
        let auth = MemoryAuthProvider::new();
        let mut changes = auth.identity_changes();
        assert_eq!(changes.next().await, Some(None));

        let id = auth.create_identity("a@b.com", "secret1").await.unwrap();
        assert_eq!(changes.next().await, Some(Some(id)));

        auth.sign_out().await.unwrap();
        assert_eq!(changes.next().await, Some(None));
    }

    #[tokio::test]
    async fn update_merges_fields_shallowly() {
        let store = MemoryDocumentStore::new();
        store
            .set("users", "u1", doc(json!({ "name": "Asha", "kindnessPoints": 3 })))
            .await
            .unwrap();
        store
            .update("users", "u1", doc(json!({ "kindnessPoints": 9 })))
            .await
            .unwrap();

        let stored = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&json!("Asha")));
        assert_eq!(stored.get("kindnessPoints"), Some(&json!(9)));
        assert!(matches!(
            store.update("users", "missing", Document::new()).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn queries_filter_order_and_limit() {
        let store = MemoryDocumentStore::new();
        for (user, ts) in [
            ("u1", "2024-01-01T10:00:00Z"),
            ("u2", "2024-01-01T11:00:00Z"),
            ("u1", "2024-01-01T12:00:00.5Z"),
            ("u1", "2024-01-01T12:00:00Z"),
        ] {
            store
                .add("moods", doc(json!({ "userId": user, "timestamp": ts })))
                .await
                .unwrap();
        }

        let query = Query::collection("moods")
            .where_eq("userId", "u1")
            .order_by_desc("timestamp")
            .limit(2);
        let results = store.query(&query).await.unwrap();
        let stamps: Vec<&Value> = results.iter().map(|d| &d.fields["timestamp"]).collect();
        assert_eq!(
            stamps,
            vec![&json!("2024-01-01T12:00:00.5Z"), &json!("2024-01-01T12:00:00Z")]
        );
    }

    #[tokio::test]
    async fn released_watches_stop_firing() {
        let store = MemoryDocumentStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = store
            .watch_document(
                "users",
                "u1",
                Box::new(move |_| {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(store.active_watches(), 1);

        store.set("users", "u1", Document::new()).await.unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);

        subscription.unsubscribe();
        assert_eq!(store.active_watches(), 0);
        store.set("users", "u1", Document::new()).await.unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let store = MemoryDocumentStore::new();
        store.fail_next(PortError::TransientNetworkFailure("offline".into()));
        assert!(store.get("users", "u1").await.is_err());
        assert_eq!(store.get("users", "u1").await, Ok(None));
    }
}
