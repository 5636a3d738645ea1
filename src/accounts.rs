//! Login, registration and logout
//!
//! Every operation reports its outcome as a `Result<_, AuthFailure>`; backend
//! errors are converted at this boundary and never escape as panics.

use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::{self, Backend};
use crate::error::{Error, ValidationError};
use crate::models::{tables, Identity, NewProfile, Profile, Role};
use crate::session::SessionStore;

/// Shortest password the sign-up form accepts
pub const MIN_PASSWORD_LEN: usize = 6;

/// Why an auth operation failed. `Display` is the text for the form.
#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The auth service refused, e.g. the email is already registered
    #[error("{0}")]
    Rejected(String),

    /// The identity exists but its profile row could not be written. The
    /// identity is left in place.
    #[error("Registration failed. Please try again.")]
    ProfileNotCreated { identity_id: String, reason: String },
}

impl AuthFailure {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<Error> for AuthFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidCredentials => AuthFailure::InvalidCredentials,
            Error::Validation(e) => AuthFailure::Invalid(e),
            other => AuthFailure::Rejected(other.user_message()),
        }
    }
}

/// Sign-up form input
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Role,
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.full_name.trim().is_empty() {
            return Err(ValidationError::Required("Full name"));
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::Required("Email"));
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
        }
        Ok(())
    }
}

/// Auth operations bound to a backend and the session they update
#[derive(Clone)]
pub struct Accounts {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
}

impl Accounts {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionStore>) -> Self {
        Self { backend, session }
    }

    /// Sign in. The session store picks the change up from the identity
    /// event stream.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthFailure> {
        match self.backend.authenticate(email.trim(), password).await {
            Ok(identity) => {
                info!("login succeeded for {}", identity.id);
                Ok(identity)
            }
            Err(e) => {
                debug!("login failed for {}", email);
                warn!("login failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Validate the form, then register
    pub async fn register_form(&self, form: &RegistrationForm) -> Result<Profile, AuthFailure> {
        form.validate()?;
        self.register(&form.full_name, &form.email, &form.password, form.role)
            .await
    }

    /// Create the identity, then its profile row.
    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Profile, AuthFailure> {
        let full_name = full_name.trim();
        let email = email.trim();
        let metadata = json!({ "full_name": full_name, "role": role });

        let identity = self
            .backend
            .create_identity(email, password, Some(metadata))
            .await
            .map_err(|e| {
                debug!("identity creation failed for {}", email);
                warn!("identity creation failed: {}", e);
                AuthFailure::from(e)
            })?;

        let new_profile = NewProfile {
            id: identity.id.clone(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            role,
        };
        let profile: Profile =
            match backend::insert_row(self.backend.as_ref(), tables::PROFILES, &new_profile).await {
                Ok(profile) => profile,
                Err(e) => {
                    error!(
                        "identity {} created but profile insert failed: {}",
                        identity.id, e
                    );
                    return Err(AuthFailure::ProfileNotCreated {
                        identity_id: identity.id,
                        reason: e.user_message(),
                    });
                }
            };

        if let Err(e) = self.session.refresh().await {
            warn!("session refresh after registration failed: {}", e);
        }
        info!("registered {} as {}", profile.id, profile.role);
        Ok(profile)
    }

    /// Sign out. Signing out without a session is a no-op.
    pub async fn logout(&self) -> Result<(), AuthFailure> {
        match self.backend.sign_out().await {
            Ok(()) | Err(Error::NotSignedIn) => Ok(()),
            Err(e) => {
                warn!("logout failed: {}", e);
                Err(e.into())
            }
        }
    }
}
