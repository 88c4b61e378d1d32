pub mod firebase_auth;
pub mod firestore;
pub mod firestore_codec;
pub mod memory;
pub mod timeout;

pub use firebase_auth::FirebaseAuthProvider;
pub use firestore::FirestoreDocumentStore;
pub use memory::{MemoryAuthProvider, MemoryDocumentStore};
pub use timeout::{CallPolicy, TimeoutAuthProvider, TimeoutDocumentStore};

use humonix_core::domain::IdentityId;
use humonix_core::ports::IdentityStream;
use tokio::sync::watch;

/// Turns an adapter's identity channel into the push stream the ports expect:
/// the current value first, then every change.
pub(crate) fn identity_stream(current: &watch::Sender<Option<IdentityId>>) -> IdentityStream {
    let mut rx = current.subscribe();
    Box::pin(async_stream::stream! {
        let first = rx.borrow_and_update().clone();
        yield first;
        while rx.changed().await.is_ok() {
            let next = rx.borrow_and_update().clone();
            yield next;
        }
    })
}
