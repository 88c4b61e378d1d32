//! crates/humonix_core/src/ports.rs
//!
//! Defines the contracts (traits) for the hosted backend.
//! These traits form the boundary of the hexagonal architecture: the gateway and
//! the stores only ever see an `AuthProvider` and a `DocumentStore`, never a
//! concrete HTTP client or in-memory map.

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use crate::domain::IdentityId;

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// The error taxonomy surfaced by the backend ports and the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("This email is already registered")]
    DuplicateIdentity,
    #[error("Password does not meet the provider's policy")]
    WeakCredential,
    #[error("Email address is malformed")]
    InvalidEmail,
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Incorrect password")]
    BadCredential,
    #[error("No profile record exists for the authenticated identity")]
    RecordMissing,
    #[error("Mood intensity {0} is outside 1..=10")]
    InvalidIntensity(u8),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Stored record could not be decoded: {0}")]
    MalformedRecord(String),
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Backend request failed: {0}")]
    TransientNetworkFailure(String),
}

impl PortError {
    /// Whether the failure may go away if the same call is issued again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::Timeout(_) | PortError::TransientNetworkFailure(_)
        )
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Documents, Queries and Subscriptions
//=========================================================================================

/// The field map of one stored document.
pub type Document = serde_json::Map<String, Value>;

/// A document together with the id it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
}

/// A bounded, ordered query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Option<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

/// Equality filter on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Called with the document's current fields, or `None` once it no longer exists.
pub type DocumentListener = Box<dyn Fn(Option<Document>) + Send + Sync + 'static>;

/// Called with the full current result set of a query.
pub type QueryListener = Box<dyn Fn(Vec<StoredDocument>) + Send + Sync + 'static>;

/// Push notifications of the provider's current identity.
pub type IdentityStream = Pin<Box<dyn Stream<Item = Option<IdentityId>> + Send + 'static>>;

/// A handle on a live feed.
///
/// Releasing the handle, either through `unsubscribe` or by dropping it, stops the
/// feed synchronously: once release returns the listener is never called again.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

//=========================================================================================
// Backend Ports (Traits)
//=========================================================================================

/// The hosted authentication provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registers a new identity and signs it in.
    async fn create_identity(&self, email: &str, password: &str) -> PortResult<IdentityId>;

    /// Signs in an existing identity.
    async fn authenticate(&self, email: &str, password: &str) -> PortResult<IdentityId>;

    async fn update_display_name(&self, identity: &IdentityId, name: &str) -> PortResult<()>;

    /// Invalidates the local session. Other devices stay signed in.
    async fn sign_out(&self) -> PortResult<()>;

    async fn current_identity(&self) -> PortResult<Option<IdentityId>>;

    /// Yields the current identity first, then every change to it.
    fn identity_changes(&self) -> IdentityStream;
}

/// The hosted document database.
///
/// Listeners are invoked from inside the store and must not call back into it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>>;

    /// Creates or fully replaces a document.
    async fn set(&self, collection: &str, id: &str, fields: Document) -> PortResult<()>;

    /// Shallow-merges `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Document) -> PortResult<()>;

    /// Adds a document under a generated id and returns that id.
    async fn add(&self, collection: &str, fields: Document) -> PortResult<String>;

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>>;

    /// Fires once with the current state, then after every write to the document.
    async fn watch_document(
        &self,
        collection: &str,
        id: &str,
        listener: DocumentListener,
    ) -> PortResult<Subscription>;

    /// Fires once with the current results, then whenever they change.
    async fn watch_query(&self, query: Query, listener: QueryListener) -> PortResult<Subscription>;
}
