//! Auth client for the academy portal
//!
//! This crate talks to the hosted auth service: sign up, password sign-in,
//! sign-out, user lookup and token refresh. Every change of the signed-in
//! session is broadcast to subscribers of [`Auth::on_auth_state_change`].

use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

const CLIENT_INFO: &str = "academy-portal-auth/0.2.0";

/// Error type
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {message} (Status: {status})")]
    ApiError {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,
}

impl AuthError {
    /// True when the service rejected an email/password pair.
    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            AuthError::ApiError { status, code, .. } => {
                code.as_deref() == Some("invalid_grant")
                    || code.as_deref() == Some("invalid_credentials")
                    || *status == StatusCode::UNAUTHORIZED
            }
            _ => false,
        }
    }
}

/// User record as returned by the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Signed-in session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

/// Sign-up outcome. Projects that require email confirmation answer with
/// the bare user and no session.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(Session),
    User(User),
}

impl SignUpResponse {
    pub fn user(&self) -> &User {
        match self {
            SignUpResponse::Session(session) => &session.user,
            SignUpResponse::User(user) => user,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SignUpResponse::Session(session) => Some(session),
            SignUpResponse::User(_) => None,
        }
    }
}

/// Kind of session change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Broadcast payload for session changes
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

/// Client options
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Capacity of the auth-state broadcast channel
    pub event_capacity: usize,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self { event_capacity: 16 }
    }
}

/// Error body shapes the auth service uses
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    error_code: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

/// Auth client
pub struct Auth {
    url: String,
    key: String,
    http_client: Client,
    current_session: Arc<RwLock<Option<Session>>>,
    state_change: broadcast::Sender<AuthStateChange>,
}

impl Auth {
    /// Create a new Auth client
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        let (state_change, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            current_session: Arc::new(RwLock::new(None)),
            state_change,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// Receiver for session changes. Each call registers a new listener.
    pub fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.state_change.subscribe()
    }

    /// Register a user. `data` is stored as the user's metadata.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<SignUpResponse, AuthError> {
        let url = self.endpoint("/signup");

        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = data {
            payload["data"] = data.clone();
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&payload)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let result: SignUpResponse = response.json().await?;

        match result.session() {
            Some(session) => {
                info!("signed up and signed in user {}", session.user.id);
                self.store_session(session.clone(), AuthChangeEvent::SignedIn);
            }
            None => info!(
                "signed up user {} (awaiting confirmation)",
                result.user().id
            ),
        }

        Ok(result)
    }

    /// Sign in with email and password
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = self.endpoint("/token?grant_type=password");

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&payload)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let session: Session = response.json().await?;

        info!("signed in user {}", session.user.id);
        self.store_session(session.clone(), AuthChangeEvent::SignedIn);

        Ok(session)
    }

    /// Current session, if any
    pub fn get_session(&self) -> Option<Session> {
        self.current_session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a session obtained elsewhere (for example a persisted one)
    pub fn set_session(&self, session: Session) {
        self.store_session(session, AuthChangeEvent::SignedIn);
    }

    /// Fetch the user behind the current session
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .get(self.endpoint("/user"))
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = self.endpoint("/token?grant_type=refresh_token");
        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&payload)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let new_session: Session = response.json().await?;

        debug!("refreshed session for user {}", new_session.user.id);
        self.store_session(new_session.clone(), AuthChangeEvent::TokenRefreshed);

        Ok(new_session)
    }

    /// Sign out. The local session is cleared and `SignedOut` is broadcast
    /// even when the service rejects the call; its error is still returned.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let result = self
            .http_client
            .post(self.endpoint("/logout"))
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .bearer_auth(&session.access_token)
            .send()
            .await;

        *self
            .current_session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.notify(AuthChangeEvent::SignedOut, None);
        info!("signed out user {}", session.user.id);

        Self::check(result?).await.map(|_| ())
    }

    fn store_session(&self, session: Session, event: AuthChangeEvent) {
        *self
            .current_session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        self.notify(event, Some(session));
    }

    fn notify(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No receivers is not an error
        if self
            .state_change
            .send(AuthStateChange { event, session })
            .is_err()
        {
            debug!("no listeners for {:?}", event);
        }
    }

    async fn check(response: Response) -> Result<Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ApiErrorBody>(&text).unwrap_or_default();
        let message = body
            .error_description
            .or(body.msg)
            .or(body.message)
            .unwrap_or_else(|| text.clone());
        let code = body.error_code.or(body.error);

        warn!("auth request failed with {}: {}", status, message);
        Err(AuthError::ApiError {
            status,
            code,
            message,
        })
    }
}
