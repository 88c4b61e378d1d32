pub mod domain;
pub mod gateway;
pub mod mood;
pub mod ports;
pub mod session;

pub use domain::{
    CommunityPost, ConversationKind, ConversationRecord, IdentityId, Intensity, MoodEntry,
    MoodLabel, MoodState, PostKind, ProfileFields, UserPatch, UserRecord,
};
pub use gateway::Gateway;
pub use mood::{MoodSnapshot, MoodStore, MOOD_HISTORY_LIMIT};
pub use ports::{
    AuthProvider, Document, DocumentListener, DocumentStore, IdentityStream, PortError,
    PortResult, Query, QueryListener, StoredDocument, Subscription,
};
pub use session::{AuthPhase, RouteAccess, SessionState, SessionStore};
