//! services/app/src/adapters/firestore.rs
//!
//! This module contains the adapter for Cloud Firestore, the hosted document
//! database. It implements the `DocumentStore` port over the Firestore REST API.
//!
//! The REST API has no push channel, so watches poll: the current state is
//! delivered before `watch_*` returns, and after that the listener fires only
//! when a poll sees something different.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use humonix_core::ports::{
    Document, DocumentListener, DocumentStore, PortError, PortResult, Query, QueryListener,
    StoredDocument, Subscription,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::firebase_auth::{network_error, FirebaseAuthProvider};
use super::firestore_codec::{decode_fields, document_id, encode_fields, encode_value};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

#[derive(Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Option<Value>,
}

#[derive(Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<RestDocument>,
}

impl RestDocument {
    fn into_stored(self) -> PortResult<StoredDocument> {
        Ok(StoredDocument {
            id: document_id(&self.name).to_string(),
            fields: decode_fields(self.fields.as_ref())?,
        })
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `DocumentStore` port using Cloud Firestore.
///
/// Requests carry the signed-in user's ID token when there is one, so the
/// project's security rules apply per user.
#[derive(Clone)]
pub struct FirestoreDocumentStore {
    http: reqwest::Client,
    documents_url: String,
    auth: Arc<FirebaseAuthProvider>,
    poll_interval: Duration,
}

impl FirestoreDocumentStore {
    /// Creates a new `FirestoreDocumentStore` for the default database of `project_id`.
    pub fn new(
        http: reqwest::Client,
        project_id: &str,
        auth: Arc<FirebaseAuthProvider>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            http,
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents",
                FIRESTORE_URL, project_id
            ),
            auth,
            poll_interval,
        }
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, collection, id)
    }

    async fn send(&self, request: RequestBuilder) -> PortResult<Response> {
        let request = match self.auth.bearer_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().await.map_err(network_error)
    }

    async fn fetch_document(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let response = self
            .send(self.http.get(self.document_url(collection, id)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: RestDocument = read_json(response).await?;
        Ok(Some(decode_fields(doc.fields.as_ref())?))
    }

    async fn run_query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        let body = json!({ "structuredQuery": structured_query(query) });
        let response = self
            .send(
                self.http
                    .post(format!("{}:runQuery", self.documents_url))
                    .json(&body),
            )
            .await?;
        let items: Vec<RunQueryItem> = read_json(response).await?;
        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(RestDocument::into_stored)
            .collect()
    }
}

//=========================================================================================
// Request and Response Helpers
//=========================================================================================

/// Builds the REST `structuredQuery` for a port-level query.
pub fn structured_query(query: &Query) -> Value {
    let mut structured = json!({ "from": [{ "collectionId": query.collection }] });
    if let Some(filter) = &query.filter {
        structured["where"] = json!({
            "fieldFilter": {
                "field": { "fieldPath": filter.field },
                "op": "EQUAL",
                "value": encode_value(&filter.value),
            }
        });
    }
    if let Some(order) = &query.order_by {
        let direction = if order.descending { "DESCENDING" } else { "ASCENDING" };
        structured["orderBy"] = json!([{
            "field": { "fieldPath": order.field },
            "direction": direction,
        }]);
    }
    if let Some(limit) = query.limit {
        structured["limit"] = json!(limit);
    }
    structured
}

/// Maps a non-success HTTP status onto the port taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(body.to_string()),
        StatusCode::BAD_REQUEST => PortError::InvalidInput(body.to_string()),
        _ => PortError::TransientNetworkFailure(format!("Firestore returned {}: {}", status, body)),
    }
}

async fn read_json<R: for<'de> Deserialize<'de>>(response: Response) -> PortResult<R> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .json::<R>()
        .await
        .map_err(|e| PortError::MalformedRecord(e.to_string()))
}

async fn expect_success(response: Response) -> PortResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Runs `poll` every `interval` until `token` is cancelled, handing each changed
/// result to `deliver`.
fn spawn_poller<T, P, Fut, D>(
    interval: Duration,
    token: CancellationToken,
    mut last: T,
    poll: P,
    deliver: D,
) where
    T: PartialEq + Clone + Send + 'static,
    P: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = PortResult<T>> + Send,
    D: Fn(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match poll().await {
                Ok(current) if current != last => {
                    last = current.clone();
                    deliver(current);
                }
                Ok(_) => {}
                Err(e) => warn!("Watch poll failed: {}", e),
            }
        }
        debug!("Watch poller stopped");
    });
}

fn release_poller<L: Send + 'static>(
    token: CancellationToken,
    slot: Arc<Mutex<Option<L>>>,
) -> Subscription {
    Subscription::new(move || {
        token.cancel();
        slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    })
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        self.fetch_document(collection, id).await
    }

    #[instrument(skip(self, fields))]
    async fn set(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        let body = json!({ "fields": encode_fields(&fields) });
        let response = self
            .send(self.http.patch(self.document_url(collection, id)).json(&body))
            .await?;
        expect_success(response).await
    }

    #[instrument(skip(self, fields))]
    async fn update(&self, collection: &str, id: &str, fields: Document) -> PortResult<()> {
        let mut params: Vec<(&str, &str)> = fields
            .keys()
            .map(|field| ("updateMask.fieldPaths", field.as_str()))
            .collect();
        params.push(("currentDocument.exists", "true"));

        let body = json!({ "fields": encode_fields(&fields) });
        let response = self
            .send(
                self.http
                    .patch(self.document_url(collection, id))
                    .query(&params)
                    .json(&body),
            )
            .await?;
        match expect_success(response).await {
            Err(PortError::NotFound(_)) => Err(PortError::NotFound(format!(
                "Document {}/{} does not exist",
                collection, id
            ))),
            other => other,
        }
    }

    #[instrument(skip(self, fields))]
    async fn add(&self, collection: &str, fields: Document) -> PortResult<String> {
        let body = json!({ "fields": encode_fields(&fields) });
        let response = self
            .send(
                self.http
                    .post(format!("{}/{}", self.documents_url, collection))
                    .json(&body),
            )
            .await?;
        let doc: RestDocument = read_json(response).await?;
        Ok(document_id(&doc.name).to_string())
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        self.run_query(query).await
    }

    async fn watch_document(
        &self,
        collection: &str,
        id: &str,
        listener: DocumentListener,
    ) -> PortResult<Subscription> {
        let initial = self.fetch_document(collection, id).await?;
        listener(initial.clone());

        let slot = Arc::new(Mutex::new(Some(listener)));
        let token = CancellationToken::new();
        let store = self.clone();
        let (collection, id) = (collection.to_string(), id.to_string());
        let delivery = Arc::clone(&slot);
        spawn_poller(
            self.poll_interval,
            token.clone(),
            initial,
            move || {
                let (store, collection, id) = (store.clone(), collection.clone(), id.clone());
                async move { store.fetch_document(&collection, &id).await }
            },
            move |current| {
                if let Some(listener) = delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                {
                    listener(current);
                }
            },
        );
        Ok(release_poller(token, slot))
    }

    async fn watch_query(&self, query: Query, listener: QueryListener) -> PortResult<Subscription> {
        let initial = self.run_query(&query).await?;
        listener(initial.clone());
        debug!("Polling query on {} every {:?}", query.collection, self.poll_interval);

        let slot = Arc::new(Mutex::new(Some(listener)));
        let token = CancellationToken::new();
        let store = self.clone();
        let delivery = Arc::clone(&slot);
        spawn_poller(
            self.poll_interval,
            token.clone(),
            initial,
            move || {
                let (store, query) = (store.clone(), query.clone());
                async move { store.run_query(&query).await }
            },
            move |current| {
                if let Some(listener) = delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                {
                    listener(current);
                }
            },
        );
        Ok(release_poller(token, slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builds_a_filtered_ordered_query() {
        let query = Query::collection("moods")
            .where_eq("userId", "uid-1")
            .order_by_desc("timestamp")
            .limit(30);

        assert_eq!(
            structured_query(&query),
            json!({
                "from": [{ "collectionId": "moods" }],
                "where": { "fieldFilter": {
                    "field": { "fieldPath": "userId" },
                    "op": "EQUAL",
                    "value": { "stringValue": "uid-1" }
                }},
                "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" }],
                "limit": 30
            })
        );
    }

    #[test]
    fn unbounded_query_only_names_the_collection() {
        assert_eq!(
            structured_query(&Query::collection("communityPosts")),
            json!({ "from": [{ "collectionId": "communityPosts" }] })
        );
    }

    #[test]
    fn maps_http_statuses() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            PortError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad field"),
            PortError::InvalidInput(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
    }

    #[tokio::test]
    async fn poller_delivers_only_changes_and_stops_on_release() {
        let polls = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let counter = Arc::clone(&polls);
        let sink = Arc::clone(&delivered);
        spawn_poller(
            Duration::from_millis(5),
            token.clone(),
            0usize,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n / 2) }
            },
            move |value| sink.lock().unwrap().push(value),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        release_poller(token, Arc::new(Mutex::new(Some(())))).unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = delivered.lock().unwrap().clone();
        let after_release = polls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(polls.load(Ordering::SeqCst), after_release);
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert!(!seen.contains(&0));
    }
}
