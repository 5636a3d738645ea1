//! Error handling for the academy portal

use academy_portal_auth::AuthError;
use academy_portal_postgrest::PostgrestError;
use std::fmt;
use thiserror::Error;

/// Unified error type for the portal
#[derive(Error, Debug)]
pub enum Error {
    /// The auth service rejected the request
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Wrong email or password
    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// An operation needed a signed-in identity
    #[error("Not signed in")]
    NotSignedIn,

    /// Row storage rejected the request
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness constraint rejected a write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Client-side form validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning view or session was torn down
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// The message shown to users, without the category prefix
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(msg)
            | Error::Database(msg)
            | Error::Conflict(msg)
            | Error::Network(msg)
            | Error::Config(msg) => msg.clone(),
            Error::Validation(err) => err.to_string(),
            other => other.to_string(),
        }
    }
}

/// Client-side validation failures. These block submission before any
/// backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Price must be a valid non-negative number")]
    InvalidPrice,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password must be at least {0} characters long")]
    PasswordTooShort(usize),
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        if err.is_invalid_credentials() {
            return Error::InvalidCredentials;
        }
        match err {
            AuthError::ApiError { message, .. } => Error::Auth(message),
            AuthError::NetworkError(e) => Error::Network(e.to_string()),
            AuthError::SerializationError(e) => Error::Json(e),
            AuthError::MissingSession => Error::NotSignedIn,
        }
    }
}

impl From<PostgrestError> for Error {
    fn from(err: PostgrestError) -> Self {
        if err.is_unique_violation() {
            return Error::Conflict(err.message());
        }
        match err {
            PostgrestError::NetworkError(e) => Error::Network(e.to_string()),
            PostgrestError::UrlParseError(e) => Error::Url(e),
            PostgrestError::SerializationError(e) => Error::Json(e),
            other => Error::Database(other.message()),
        }
    }
}
