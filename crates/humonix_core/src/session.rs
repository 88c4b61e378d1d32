//! crates/humonix_core/src/session.rs
//!
//! The session store: the single authority for who is signed in.
//!
//! The store publishes a `SessionState` through a `watch` channel and owns the one
//! live feed on the signed-in user's record. The feed handle lives in a single
//! slot, so replacing or clearing the slot is the only way a feed ends and a
//! second feed can never be opened next to the first.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{IdentityId, ProfileFields, UserPatch, UserRecord};
use crate::gateway::Gateway;
use crate::ports::{PortError, PortResult, Subscription};

//=========================================================================================
// Observable State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Nothing is known yet; `initialize_auth` has not resolved.
    Unknown,
    Authenticating,
    Authenticated,
    Anonymous,
}

/// What a protected page should do for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Allowed,
    RedirectHome,
    RedirectDashboard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<UserRecord>,
    pub phase: AuthPhase,
    pub is_loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            phase: AuthPhase::Unknown,
            is_loading: false,
        }
    }
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Signed-out users go home; non-admins are kept off admin-only pages.
    pub fn route_access(&self, admin_only: bool) -> RouteAccess {
        match &self.user {
            None => RouteAccess::RedirectHome,
            Some(user) if admin_only && !user.is_admin => RouteAccess::RedirectDashboard,
            Some(_) => RouteAccess::Allowed,
        }
    }
}

//=========================================================================================
// SessionStore
//=========================================================================================

struct LiveFeed {
    identity: IdentityId,
    _subscription: Subscription,
}

enum Settle {
    Succeeded,
    RecordMissing,
    Failed,
}

pub struct SessionStore {
    gateway: Arc<Gateway>,
    state: Arc<watch::Sender<SessionState>>,
    live: Mutex<Option<LiveFeed>>,
    /// Login, signup and initialization calls still in flight.
    pending: AtomicUsize,
    /// Bumped by every explicit login, signup and logout. Identity events read
    /// before a bump are stale.
    epoch: AtomicU64,
    initialized: AtomicBool,
    shutdown: CancellationToken,
}

impl SessionStore {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            gateway,
            state: Arc::new(state),
            live: Mutex::new(None),
            pending: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// A read-only view on the session for UI consumers.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn route_access(&self, admin_only: bool) -> RouteAccess {
        self.state.borrow().route_access(admin_only)
    }

    pub async fn has_live_feed(&self) -> bool {
        self.live.lock().await.is_some()
    }

    //=====================================================================================
    // Startup
    //=====================================================================================

    /// Resolves the provider's current identity, then keeps following it.
    ///
    /// Returns once the first identity event has been applied. Later events are
    /// handled by a background task that stops on `shutdown`.
    pub async fn initialize_auth(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("initialize_auth called more than once; ignoring");
            return;
        }
        info!("Initializing auth...");
        self.begin(None);

        let mut changes = self.gateway.identity_changes();
        let token = self.shutdown.clone();

        // Epochs are read before waiting, so an event caused by a login or logout
        // that starts meanwhile is treated as stale.
        let epoch = self.epoch.load(Ordering::SeqCst);
        let first = tokio::select! {
            _ = token.cancelled() => None,
            next = changes.next() => next,
        };
        if let Some(identity) = first {
            self.apply_identity(identity, epoch, 1).await;
        }
        self.finish_initialization();

        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(epoch) = store.upgrade().map(|s| s.epoch.load(Ordering::SeqCst)) else {
                    break;
                };
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = changes.next() => next,
                };
                let Some(identity) = next else { break };
                let Some(store) = store.upgrade() else { break };
                store.apply_identity(identity, epoch, 0).await;
            }
            debug!("Identity listener stopped");
        });
    }

    fn finish_initialization(&self) {
        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        self.state.send_modify(|s| {
            if s.phase == AuthPhase::Unknown {
                s.phase = AuthPhase::Anonymous;
            }
            s.is_loading = remaining > 0;
        });
    }

    async fn apply_identity(&self, identity: Option<IdentityId>, epoch: u64, own_pending: usize) {
        let Some(identity) = identity else {
            let mut live = self.live.lock().await;
            if self.superseded(epoch, own_pending) {
                return;
            }
            info!("No signed-in identity; session is anonymous");
            self.release(&mut live);
            return;
        };

        if self.is_live_for(&identity).await {
            return;
        }
        let fetched = self.gateway.fetch_user_record(&identity).await;

        let mut live = self.live.lock().await;
        if self.superseded(epoch, own_pending)
            || live.as_ref().is_some_and(|feed| feed.identity == identity)
        {
            return;
        }
        match fetched {
            Ok(Some(record)) => {
                info!("Restored session for {}", identity);
                if let Err(e) = self.establish(&mut live, record).await {
                    error!("Failed to open live feed for {}: {}", identity, e);
                    self.release(&mut live);
                }
            }
            Ok(None) => {
                warn!("Identity {} has no profile record; treating as signed out", identity);
                self.release(&mut live);
            }
            Err(e) => {
                error!("Error getting user data for {}: {}", identity, e);
                self.release(&mut live);
            }
        }
    }

    /// An explicit operation started after the event was read, or is still running.
    fn superseded(&self, epoch: u64, own_pending: usize) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
            || self.pending.load(Ordering::SeqCst) > own_pending
    }

    async fn is_live_for(&self, identity: &IdentityId) -> bool {
        self.live
            .lock()
            .await
            .as_ref()
            .is_some_and(|feed| &feed.identity == identity)
    }

    //=====================================================================================
    // Actions
    //=====================================================================================

    pub async fn login(&self, email: &str, password: &str) -> PortResult<UserRecord> {
        let previous = self.begin(Some(AuthPhase::Authenticating));
        let outcome = self.login_inner(email, password).await;
        self.settle(previous, &outcome).await;
        outcome
    }

    async fn login_inner(&self, email: &str, password: &str) -> PortResult<UserRecord> {
        let identity = self.gateway.authenticate(email, password).await?;
        let mut live = self.live.lock().await;
        match self.gateway.fetch_user_record(&identity).await? {
            Some(record) => {
                info!("User {} signed in", identity);
                self.establish(&mut live, record).await
            }
            None => {
                warn!("Identity {} has no profile record; treating as signed out", identity);
                self.release(&mut live);
                Err(PortError::RecordMissing)
            }
        }
    }

    pub async fn signup(&self, fields: ProfileFields, password: &str) -> PortResult<UserRecord> {
        let previous = self.begin(Some(AuthPhase::Authenticating));
        let outcome = self.signup_inner(fields, password).await;
        self.settle(previous, &outcome).await;
        outcome
    }

    async fn signup_inner(&self, fields: ProfileFields, password: &str) -> PortResult<UserRecord> {
        info!("Starting signup for {}", fields.email);
        let identity = self.gateway.create_identity(&fields.email, password).await?;

        let record = match self.gateway.create_user_record(&identity, fields).await {
            Ok(record) => record,
            Err(e) => {
                // The identity now exists without a profile. Sign it out so the
                // provider does not keep a half-registered principal signed in.
                error!("Identity {} created but its profile was not written: {}", identity, e);
                if let Err(sign_out_err) = self.gateway.sign_out().await {
                    warn!("Sign-out after failed signup also failed: {}", sign_out_err);
                }
                return Err(e);
            }
        };

        let mut live = self.live.lock().await;
        info!("Signup successful for {}", identity);
        self.establish(&mut live, record).await
    }

    /// Closes the live feed, clears the session and invalidates the backend session.
    pub async fn logout(&self) -> PortResult<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut live = self.live.lock().await;
            self.release(&mut live);
        }
        self.gateway.sign_out().await?;
        info!("User signed out");
        Ok(())
    }

    /// Writes a partial update for the signed-in user.
    ///
    /// Does nothing while signed out. Local state is not touched; the change
    /// arrives through the live feed.
    pub async fn update_user(&self, patch: UserPatch) -> PortResult<()> {
        let Some(user) = self.current_user() else {
            debug!("update_user ignored: no signed-in user");
            return Ok(());
        };
        if patch.is_empty() {
            return Ok(());
        }
        self.gateway.patch_user_record(&user.id, &patch).await
    }

    pub async fn award_kindness_points(&self, points: u64) -> PortResult<()> {
        let Some(user) = self.current_user() else {
            return Ok(());
        };
        let total = user.kindness_points.saturating_add(points);
        self.update_user(UserPatch::kindness_points(total)).await
    }

    /// Extends the daily check-in streak by one day.
    pub async fn record_check_in(&self) -> PortResult<()> {
        let Some(user) = self.current_user() else {
            return Ok(());
        };
        self.update_user(UserPatch::streak_days(user.streak_days.saturating_add(1)))
            .await
    }

    /// Stops following the provider and closes the live feed.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut live = self.live.lock().await;
        self.release(&mut live);
    }

    //=====================================================================================
    // Transitions
    //=====================================================================================

    fn begin(&self, phase: Option<AuthPhase>) -> AuthPhase {
        if phase.is_some() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut previous = AuthPhase::Unknown;
        self.state.send_modify(|s| {
            previous = s.phase;
            if let Some(phase) = phase {
                s.phase = phase;
            }
            s.is_loading = true;
        });
        previous
    }

    /// Clears the in-flight marker and derives the resulting phase from the feed slot.
    async fn settle(&self, previous: AuthPhase, outcome: &PortResult<UserRecord>) {
        let settle = match outcome {
            Ok(_) => Settle::Succeeded,
            Err(PortError::RecordMissing) => Settle::RecordMissing,
            Err(_) => Settle::Failed,
        };

        let live = self.live.lock().await;
        let phase = match (settle, live.is_some()) {
            (Settle::RecordMissing, _) => AuthPhase::Anonymous,
            (_, true) => AuthPhase::Authenticated,
            (Settle::Failed, false) if previous != AuthPhase::Authenticated => previous,
            _ => AuthPhase::Anonymous,
        };
        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        self.state.send_modify(|s| {
            s.phase = phase;
            s.is_loading = remaining > 0;
        });
        if let Err(e) = outcome {
            debug!("Auth operation failed: {}", e);
        }
    }

    /// Replaces the live feed with one on `record`'s identity.
    ///
    /// The previous feed is released before the new one is opened.
    async fn establish(
        &self,
        live: &mut Option<LiveFeed>,
        record: UserRecord,
    ) -> PortResult<UserRecord> {
        if let Some(previous) = live.take() {
            debug!("Releasing live feed for {}", previous.identity);
            drop(previous);
            self.state.send_modify(|s| s.user = None);
        }

        let state = Arc::clone(&self.state);
        let subscription = self
            .gateway
            .subscribe_user_record(&record.id, move |updated| {
                state.send_modify(|s| s.user = Some(updated));
            })
            .await?;

        *live = Some(LiveFeed {
            identity: record.id.clone(),
            _subscription: subscription,
        });
        self.state.send_modify(|s| {
            if s.user.is_none() {
                s.user = Some(record.clone());
            }
            s.phase = AuthPhase::Authenticated;
        });
        Ok(record)
    }

    fn release(&self, live: &mut Option<LiveFeed>) {
        if let Some(feed) = live.take() {
            debug!("Releasing live feed for {}", feed.identity);
        }
        self.state.send_modify(|s| {
            s.user = None;
            s.phase = AuthPhase::Anonymous;
        });
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(is_admin: bool) -> UserRecord {
        let mut record = UserRecord::from_signup(
            IdentityId::new("uid-1"),
            ProfileFields::new("a@b.com"),
            Utc::now(),
        );
        record.is_admin = is_admin;
        record
    }

    #[test]
    fn default_state_is_unknown_and_idle() {
        let state = SessionState::default();
        assert_eq!(state.phase, AuthPhase::Unknown);
        assert!(!state.is_loading);
        assert!(!state.is_authenticated());
    }

    #[test]
    fn signed_out_sessions_are_sent_home() {
        let state = SessionState::default();
        assert_eq!(state.route_access(false), RouteAccess::RedirectHome);
        assert_eq!(state.route_access(true), RouteAccess::RedirectHome);
    }

    #[test]
    fn admin_pages_require_the_admin_flag() {
        let mut state = SessionState {
            user: Some(user(false)),
            phase: AuthPhase::Authenticated,
            is_loading: false,
        };
        assert_eq!(state.route_access(false), RouteAccess::Allowed);
        assert_eq!(state.route_access(true), RouteAccess::RedirectDashboard);

        state.user = Some(user(true));
        assert_eq!(state.route_access(true), RouteAccess::Allowed);
    }
}
