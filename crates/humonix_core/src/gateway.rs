//! crates/humonix_core/src/gateway.rs
//!
//! The remote data gateway: the only component that talks to the backend ports.
//! It maps domain records onto documents and collections and never retries or
//! swallows an error.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{
    CommunityPost, ConversationRecord, IdentityId, MoodEntry, ProfileFields, UserPatch,
    UserRecord,
};
use crate::ports::{
    AuthProvider, Document, DocumentStore, IdentityStream, PortError, PortResult, Query,
    StoredDocument, Subscription,
};

pub const USERS: &str = "users";
pub const MOODS: &str = "moods";
pub const CONVERSATIONS: &str = "conversations";
pub const COMMUNITY_POSTS: &str = "communityPosts";

/// Number of posts shown on the community feed when no limit is given.
pub const DEFAULT_FEED_LIMIT: usize = 20;

#[derive(Clone)]
pub struct Gateway {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DocumentStore>,
}

impl Gateway {
    pub fn new(auth: Arc<dyn AuthProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { auth, store }
    }

    //=====================================================================================
    // Identity
    //=====================================================================================

    pub async fn create_identity(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(PortError::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }
        debug!("Creating identity for {}", email);
        self.auth.create_identity(email, password).await
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        debug!("Authenticating {}", email);
        self.auth.authenticate(email, password).await
    }

    pub async fn sign_out(&self) -> PortResult<()> {
        self.auth.sign_out().await
    }

    pub async fn current_identity(&self) -> PortResult<Option<IdentityId>> {
        self.auth.current_identity().await
    }

    pub fn identity_changes(&self) -> IdentityStream {
        self.auth.identity_changes()
    }

    //=====================================================================================
    // User Records
    //=====================================================================================

    /// Writes the initial profile for an identity that was just created.
    ///
    /// Not idempotent: a second call overwrites the first record.
    pub async fn create_user_record(
        &self,
        identity: &IdentityId,
        fields: ProfileFields,
    ) -> PortResult<UserRecord> {
        self.auth
            .update_display_name(identity, fields.display_name())
            .await?;

        let record = UserRecord::from_signup(identity.clone(), fields, Utc::now());
        self.store
            .set(USERS, identity.as_str(), to_document(&record)?)
            .await?;
        debug!("Created user record {}", identity);
        Ok(record)
    }

    pub async fn fetch_user_record(&self, identity: &IdentityId) -> PortResult<Option<UserRecord>> {
        match self.store.get(USERS, identity.as_str()).await? {
            Some(fields) => from_document(identity.as_str(), fields).map(Some),
            None => Ok(None),
        }
    }

    /// Shallow-merges the patch into the stored record and stamps `updatedAt`.
    pub async fn patch_user_record(&self, identity: &IdentityId, patch: &UserPatch) -> PortResult<()> {
        let mut fields = to_document(patch)?;
        fields.insert(
            "updatedAt".to_string(),
            serde_json::to_value(Utc::now()).map_err(encode_error)?,
        );
        self.store.update(USERS, identity.as_str(), fields).await
    }

    /// Opens a live feed on one user record.
    ///
    /// `on_change` fires with the current record and again after every remote write.
    /// A deleted record is not forwarded.
    pub async fn subscribe_user_record<F>(
        &self,
        identity: &IdentityId,
        on_change: F,
    ) -> PortResult<Subscription>
    where
        F: Fn(UserRecord) + Send + Sync + 'static,
    {
        let id = identity.as_str().to_string();
        let listener = Box::new(move |fields: Option<Document>| {
            let Some(fields) = fields else {
                debug!("User record {} no longer exists", id);
                return;
            };
            match from_document::<UserRecord>(&id, fields) {
                Ok(record) => on_change(record),
                Err(e) => warn!("Ignoring undecodable update for user {}: {}", id, e),
            }
        });
        self.store
            .watch_document(USERS, identity.as_str(), listener)
            .await
    }

    //=====================================================================================
    // Moods
    //=====================================================================================

    /// Stores a mood entry stamped with the write time.
    ///
    /// Returns the entry as stored: its generated id and the stamped timestamp
    /// replace whatever the caller supplied.
    pub async fn append_mood_entry(&self, entry: &MoodEntry) -> PortResult<MoodEntry> {
        let mut stored = entry.clone();
        stored.timestamp = Utc::now();
        let mut fields = to_document(&stored)?;
        fields.remove("id");
        stored.id = Some(self.store.add(MOODS, fields).await?);
        Ok(stored)
    }

    /// The owner's newest mood entries, newest first.
    pub async fn fetch_mood_history(
        &self,
        identity: &IdentityId,
        limit: usize,
    ) -> PortResult<Vec<MoodEntry>> {
        let query = Query::collection(MOODS)
            .where_eq("userId", identity.as_str())
            .order_by_desc("timestamp")
            .limit(limit);
        decode_all(self.store.query(&query).await?)
    }

    //=====================================================================================
    // Conversations
    //=====================================================================================

    pub async fn save_conversation(&self, conversation: &ConversationRecord) -> PortResult<String> {
        let mut fields = to_document(conversation)?;
        fields.remove("id");
        self.store.add(CONVERSATIONS, fields).await
    }

    pub async fn fetch_conversations(
        &self,
        identity: &IdentityId,
    ) -> PortResult<Vec<ConversationRecord>> {
        let query = Query::collection(CONVERSATIONS)
            .where_eq("userId", identity.as_str())
            .order_by_desc("timestamp");
        decode_all(self.store.query(&query).await?)
    }

    //=====================================================================================
    // Community Feed
    //=====================================================================================

    pub async fn create_community_post(&self, post: &CommunityPost) -> PortResult<String> {
        let mut fields = to_document(post)?;
        fields.remove("id");
        self.store.add(COMMUNITY_POSTS, fields).await
    }

    pub async fn fetch_community_posts(&self, limit: usize) -> PortResult<Vec<CommunityPost>> {
        decode_all(self.store.query(&feed_query(limit)).await?)
    }

    pub async fn update_post_likes(&self, post_id: &str, likes: u64) -> PortResult<()> {
        let mut fields = Document::new();
        fields.insert("likes".to_string(), Value::from(likes));
        self.store.update(COMMUNITY_POSTS, post_id, fields).await
    }

    /// Opens a live feed on the newest `limit` community posts.
    pub async fn subscribe_community_posts<F>(
        &self,
        limit: usize,
        on_change: F,
    ) -> PortResult<Subscription>
    where
        F: Fn(Vec<CommunityPost>) + Send + Sync + 'static,
    {
        let listener = Box::new(move |docs: Vec<StoredDocument>| match decode_all(docs) {
            Ok(posts) => on_change(posts),
            Err(e) => warn!("Ignoring undecodable community feed update: {}", e),
        });
        self.store.watch_query(feed_query(limit), listener).await
    }
}

fn feed_query(limit: usize) -> Query {
    Query::collection(COMMUNITY_POSTS)
        .order_by_desc("timestamp")
        .limit(limit)
}

//=========================================================================================
// Document Mapping
//=========================================================================================

fn encode_error(e: serde_json::Error) -> PortError {
    PortError::InvalidInput(e.to_string())
}

fn to_document<T: Serialize>(value: &T) -> PortResult<Document> {
    match serde_json::to_value(value).map_err(encode_error)? {
        Value::Object(fields) => Ok(fields),
        other => Err(PortError::InvalidInput(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Decodes a document, taking its id from the storage key rather than the fields.
fn from_document<T: DeserializeOwned>(id: &str, mut fields: Document) -> PortResult<T> {
    fields.insert("id".to_string(), Value::from(id));
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| PortError::MalformedRecord(format!("{}: {}", id, e)))
}

fn decode_all<T: DeserializeOwned>(docs: Vec<StoredDocument>) -> PortResult<Vec<T>> {
    docs.into_iter()
        .map(|doc| from_document(&doc.id, doc.fields))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Intensity, MoodLabel};
    use serde_json::json;

    #[test]
    fn documents_take_their_id_from_the_key() {
        let fields = to_document(&json!({
            "userId": "u1",
            "mood": "lonely",
            "intensity": 4,
            "tags": ["Homesickness"],
            "timestamp": "2024-05-02T08:30:00Z"
        }))
        .unwrap();
        let entry: MoodEntry = from_document("m-7", fields).unwrap();
        assert_eq!(entry.id.as_deref(), Some("m-7"));
        assert_eq!(entry.mood, MoodLabel::Lonely);
        assert_eq!(entry.intensity, Intensity::new(4).unwrap());
    }

    #[test]
    fn scalar_values_are_not_documents() {
        assert!(matches!(
            to_document(&5u8),
            Err(PortError::InvalidInput(_))
        ));
    }

    #[test]
    fn undecodable_documents_surface_as_malformed() {
        let fields = to_document(&json!({ "mood": 3 })).unwrap();
        let result: PortResult<MoodEntry> = from_document("m-1", fields);
        assert!(matches!(result, Err(PortError::MalformedRecord(_))));
    }
}
