//! services/app/src/adapters/firebase_auth.rs
//!
//! This module contains the adapter for Firebase Authentication, talking to the
//! Identity Toolkit REST API. It implements the `AuthProvider` port from the
//! `core` crate and keeps the signed-in user's tokens for the Firestore adapter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use humonix_core::domain::IdentityId;
use humonix_core::ports::{AuthProvider, IdentityStream, PortError, PortResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::identity_stream;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
struct Tokens {
    identity: IdentityId,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Tokens {
    fn new(identity: IdentityId, id_token: String, refresh_token: String, expires_in: &str) -> Self {
        let lifetime = expires_in.parse::<i64>().unwrap_or(3600);
        Self {
            identity,
            id_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(lifetime - EXPIRY_MARGIN_SECS),
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

pub(crate) fn network_error(e: reqwest::Error) -> PortError {
    PortError::TransientNetworkFailure(e.to_string())
}

/// Maps an Identity Toolkit error message (e.g. `WEAK_PASSWORD : Password should be
/// at least 6 characters`) onto the port taxonomy.
pub fn map_auth_error(message: &str) -> PortError {
    let code = message
        .split(|c: char| c == ' ' || c == ':')
        .next()
        .unwrap_or(message);
    match code {
        "EMAIL_EXISTS" => PortError::DuplicateIdentity,
        "WEAK_PASSWORD" => PortError::WeakCredential,
        "INVALID_EMAIL" | "MISSING_EMAIL" => PortError::InvalidEmail,
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => PortError::NotFound(message.to_string()),
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "MISSING_PASSWORD" => {
            PortError::BadCredential
        }
        _ => PortError::TransientNetworkFailure(message.to_string()),
    }
}

async fn read_json<R: DeserializeOwned>(response: reqwest::Response) -> PortResult<R> {
    let status = response.status();
    if status.is_success() {
        return response.json::<R>().await.map_err(network_error);
    }
    match response.json::<ErrorEnvelope>().await {
        Ok(envelope) => Err(map_auth_error(&envelope.error.message)),
        Err(_) => Err(PortError::TransientNetworkFailure(format!(
            "auth provider returned {}",
            status
        ))),
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AuthProvider` port using Firebase Authentication.
pub struct FirebaseAuthProvider {
    http: reqwest::Client,
    api_key: String,
    tokens: RwLock<Option<Tokens>>,
    current: watch::Sender<Option<IdentityId>>,
}

impl FirebaseAuthProvider {
    /// Creates a new `FirebaseAuthProvider`.
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            http,
            api_key: api_key.into(),
            tokens: RwLock::new(None),
            current,
        }
    }

    /// The signed-in user's ID token, refreshed if it is about to expire.
    ///
    /// `None` while nobody is signed in.
    pub async fn bearer_token(&self) -> PortResult<Option<String>> {
        let tokens = self.tokens.read().await.clone();
        let Some(tokens) = tokens else {
            return Ok(None);
        };
        if Utc::now() < tokens.expires_at {
            return Ok(Some(tokens.id_token));
        }

        debug!("Refreshing ID token for {}", tokens.identity);
        let response = self
            .http
            .post(format!("{}?key={}", SECURE_TOKEN_URL, self.api_key))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(network_error)?;
        let refreshed: RefreshResponse = read_json(response).await?;

        let renewed = Tokens::new(
            IdentityId::new(refreshed.user_id),
            refreshed.id_token,
            refreshed.refresh_token,
            &refreshed.expires_in,
        );
        let id_token = renewed.id_token.clone();
        *self.tokens.write().await = Some(renewed);
        Ok(Some(id_token))
    }

    async fn call<B, R>(&self, endpoint: &str, body: &B) -> PortResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/accounts:{}?key={}", IDENTITY_TOOLKIT_URL, endpoint, self.api_key);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        read_json(response).await
    }

    async fn password_flow(&self, endpoint: &str, email: &str, password: &str) -> PortResult<IdentityId> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: PasswordResponse = self.call(endpoint, &request).await?;
        let identity = IdentityId::new(response.local_id);

        *self.tokens.write().await = Some(Tokens::new(
            identity.clone(),
            response.id_token,
            response.refresh_token,
            &response.expires_in,
        ));
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for FirebaseAuthProvider {
    async fn create_identity(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        let identity = self.password_flow("signUp", email, password).await?;
        info!("Firebase user created: {}", identity);
        Ok(identity)
    }

    async fn authenticate(&self, email: &str, password: &str) -> PortResult<IdentityId> {
        self.password_flow("signInWithPassword", email, password).await
    }

    async fn update_display_name(&self, identity: &IdentityId, name: &str) -> PortResult<()> {
        let signed_in = self
            .tokens
            .read()
            .await
            .as_ref()
            .is_some_and(|tokens| &tokens.identity == identity);
        if !signed_in {
            warn!("Cannot update display name of {}: not the signed-in user", identity);
            return Err(PortError::NotFound(format!("Identity {} is not signed in", identity)));
        }
        let id_token = self
            .bearer_token()
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Identity {} is not signed in", identity)))?;

        let request = UpdateProfileRequest {
            id_token: &id_token,
            display_name: name,
            return_secure_token: false,
        };
        let _: serde_json::Value = self.call("update", &request).await?;
        Ok(())
    }

    async fn sign_out(&self) -> PortResult<()> {
        *self.tokens.write().await = None;
        self.current.send_replace(None);
        Ok(())
    }

    async fn current_identity(&self) -> PortResult<Option<IdentityId>> {
        Ok(self.current.borrow().clone())
    }

    fn identity_changes(&self) -> IdentityStream {
        identity_stream(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_provider_error_codes() {
        assert_eq!(map_auth_error("EMAIL_EXISTS"), PortError::DuplicateIdentity);
        assert_eq!(
            map_auth_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            PortError::WeakCredential
        );
        assert_eq!(map_auth_error("INVALID_EMAIL"), PortError::InvalidEmail);
        assert!(matches!(map_auth_error("EMAIL_NOT_FOUND"), PortError::NotFound(_)));
        assert_eq!(map_auth_error("INVALID_PASSWORD"), PortError::BadCredential);
        assert_eq!(
            map_auth_error("INVALID_LOGIN_CREDENTIALS"),
            PortError::BadCredential
        );
        assert!(matches!(
            map_auth_error("TOO_MANY_ATTEMPTS_TRY_LATER"),
            PortError::TransientNetworkFailure(_)
        ));
    }

    #[test]
    fn tokens_expire_before_the_provider_deadline() {
        let tokens = Tokens::new(
            IdentityId::new("uid"),
            "id".to_string(),
            "refresh".to_string(),
            "3600",
        );
        let remaining = tokens.expires_at - Utc::now();
        assert!(remaining <= Duration::seconds(3600 - EXPIRY_MARGIN_SECS));
        assert!(remaining > Duration::seconds(3000));
    }

    #[tokio::test]
    async fn sign_out_clears_the_session() {
        let auth = FirebaseAuthProvider::new(reqwest::Client::new(), "key");
        assert_eq!(auth.bearer_token().await, Ok(None));
        auth.sign_out().await.unwrap();
        assert_eq!(auth.current_identity().await, Ok(None));
    }
}
