//! services/app/src/bin/humonix.rs

use app_lib::{
    backend::build_gateway,
    config::{Config, LoginCredentials},
    error::AppError,
};
use humonix_core::gateway::DEFAULT_FEED_LIMIT;
use humonix_core::{MoodStore, PortError, ProfileFields, SessionStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting humonix...");

    // --- 2. Build the Gateway and the Stores ---
    let gateway = Arc::new(build_gateway(&config)?);
    let session = Arc::new(SessionStore::new(Arc::clone(&gateway)));
    let moods = MoodStore::new(Arc::clone(&gateway));

    // --- 3. Follow Session Changes ---
    let mut session_rx = session.subscribe();
    let watcher = tokio::spawn(async move {
        while session_rx.changed().await.is_ok() {
            let state = session_rx.borrow_and_update().clone();
            match &state.user {
                Some(user) => info!(
                    "Session {:?}: {} ({} kindness points, {} day streak)",
                    state.phase, user.name, user.kindness_points, user.streak_days
                ),
                None => info!("Session {:?}, loading: {}", state.phase, state.is_loading),
            }
        }
    });

    // --- 4. Resolve the Current Identity ---
    session.initialize_auth().await;

    if let Some(credentials) = &config.login {
        sign_in(&session, credentials).await?;
    }

    if let Some(user) = session.current_user() {
        let history = moods.load_mood_history(&user.id).await?;
        info!("Loaded {} recent mood entries for {}", history.len(), user.id);
        let posts = gateway.fetch_community_posts(DEFAULT_FEED_LIMIT).await?;
        info!("{} posts on the community feed", posts.len());
    } else {
        info!("No one is signed in. Set HUMONIX_LOGIN_EMAIL and HUMONIX_LOGIN_PASSWORD to sign in on startup.");
    }

    // --- 5. Run Until Interrupted ---
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    session.shutdown().await;
    watcher.abort();
    Ok(())
}

/// Signs in with the configured credentials, registering the account first if
/// the provider has never seen it.
async fn sign_in(session: &SessionStore, credentials: &LoginCredentials) -> Result<(), AppError> {
    match session.login(&credentials.email, &credentials.password).await {
        Ok(user) => {
            info!("Signed in as {}", user.name);
            Ok(())
        }
        Err(PortError::NotFound(_)) => {
            warn!("No account for {}; signing up", credentials.email);
            let user = session
                .signup(ProfileFields::new(credentials.email.clone()), &credentials.password)
                .await?;
            info!("Registered and signed in as {}", user.name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
