//! services/app/src/backend.rs
//!
//! Builds the `Gateway` for the configured backend. Whichever backend is chosen,
//! both ports are wrapped in the timeout decorators before the stores see them.

use std::sync::Arc;

use humonix_core::ports::{AuthProvider, DocumentStore};
use humonix_core::Gateway;
use tracing::info;

use crate::adapters::{
    CallPolicy, FirebaseAuthProvider, FirestoreDocumentStore, MemoryAuthProvider,
    MemoryDocumentStore, TimeoutAuthProvider, TimeoutDocumentStore,
};
use crate::config::{BackendKind, Config};
use crate::error::AppError;

/// Creates the auth provider and document store for `config.backend`.
pub fn build_ports(
    config: &Config,
) -> Result<(Arc<dyn AuthProvider>, Arc<dyn DocumentStore>), AppError> {
    match &config.backend {
        BackendKind::Memory => {
            info!("Using the in-memory backend. Nothing will be persisted.");
            let auth: Arc<dyn AuthProvider> = Arc::new(MemoryAuthProvider::new());
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
            Ok((auth, store))
        }
        BackendKind::Firebase {
            api_key,
            project_id,
        } => {
            info!("Using the Firebase backend for project {}", project_id);
            let http = reqwest::Client::builder()
                .user_agent(concat!("humonix/", env!("CARGO_PKG_VERSION")))
                .build()?;
            let auth = Arc::new(FirebaseAuthProvider::new(http.clone(), api_key.clone()));
            let store: Arc<dyn DocumentStore> = Arc::new(FirestoreDocumentStore::new(
                http,
                project_id,
                Arc::clone(&auth),
                config.poll_interval,
            ));
            let auth: Arc<dyn AuthProvider> = auth;
            Ok((auth, store))
        }
    }
}

/// Builds the gateway, bounding every call by the configured `CallPolicy`.
pub fn build_gateway(config: &Config) -> Result<Gateway, AppError> {
    let (auth, store) = build_ports(config)?;
    let policy = CallPolicy::from_config(config);
    Ok(Gateway::new(
        Arc::new(TimeoutAuthProvider::new(auth, policy)),
        Arc::new(TimeoutDocumentStore::new(store, policy)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: BackendKind) -> Config {
        Config::from_lookup(|_| None).map(|c| Config { backend, ..c }).unwrap()
    }

    #[tokio::test]
    async fn memory_gateway_round_trips_a_signup() {
        let gateway = build_gateway(&config(BackendKind::Memory)).unwrap();
        let id = gateway.create_identity("a@b.com", "secret1").await.unwrap();
        assert_eq!(gateway.current_identity().await, Ok(Some(id)));
    }

    #[tokio::test]
    async fn firebase_gateway_builds_without_network() {
        let backend = BackendKind::Firebase {
            api_key: "key".to_string(),
            project_id: "humonix-dev".to_string(),
        };
        let gateway = build_gateway(&config(backend)).unwrap();
        assert_eq!(gateway.current_identity().await, Ok(None));
    }
}
