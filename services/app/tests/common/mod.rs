//! Shared wiring for the integration tests: the stores over the in-memory backend,
//! with the backend handles kept for inspection and fault injection.

#![allow(dead_code)]

use app_lib::adapters::{MemoryAuthProvider, MemoryDocumentStore};
use humonix_core::{Gateway, MoodStore, ProfileFields, SessionStore};
use std::sync::Arc;

pub const EMAIL: &str = "a@b.com";
pub const PASSWORD: &str = "secret1";

pub struct Harness {
    pub auth: Arc<MemoryAuthProvider>,
    pub store: MemoryDocumentStore,
    pub gateway: Arc<Gateway>,
    pub session: Arc<SessionStore>,
    pub moods: MoodStore,
}

impl Harness {
    pub fn new() -> Self {
        let auth = Arc::new(MemoryAuthProvider::new());
        let store = MemoryDocumentStore::new();
        let gateway = Arc::new(Gateway::new(auth.clone(), Arc::new(store.clone())));
        Self {
            session: Arc::new(SessionStore::new(Arc::clone(&gateway))),
            moods: MoodStore::new(Arc::clone(&gateway)),
            auth,
            store,
            gateway,
        }
    }

    /// A second session over the same backend, as if the app were restarted.
    pub fn restart(&self) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Arc::clone(&self.gateway)))
    }
}

pub fn profile(email: &str, name: &str) -> ProfileFields {
    let mut fields = ProfileFields::new(email);
    fields.name = Some(name.to_string());
    fields
}
