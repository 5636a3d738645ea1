//! Configuration for the portal client

use std::time::Duration;

use crate::error::Error;

/// Environment variable holding the project URL
pub const URL_VAR: &str = "SUPABASE_URL";
/// Environment variable holding the anonymous key
pub const ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";

/// Configuration options for the backend client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long before expiry the access token is refreshed
    pub refresh_margin: Duration,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Capacity of the identity-change broadcast
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60),
            request_timeout: Some(Duration::from_secs(30)),
            event_capacity: 16,
        }
    }
}

impl ClientOptions {
    /// Set the token refresh margin
    pub fn with_refresh_margin(mut self, value: Duration) -> Self {
        self.refresh_margin = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the identity-change broadcast capacity
    pub fn with_event_capacity(mut self, value: usize) -> Self {
        self.event_capacity = value;
        self
    }
}

/// Where the hosted backend lives
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub supabase_url: String,
    pub anon_key: String,
    pub options: ClientOptions,
}

impl PortalConfig {
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        Self {
            supabase_url: supabase_url.to_string(),
            anon_key: anon_key.to_string(),
            options: ClientOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Load from the environment, reading a `.env` file first when present.
    ///
    /// `SUPABASE_URL` and `SUPABASE_ANON_KEY` are required; the `VITE_`
    /// prefixed names used by the web build are accepted as fallbacks.
    /// `PORTAL_REQUEST_TIMEOUT_SECS` overrides the request timeout.
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&format!("VITE_{}", name)))
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::config(format!("missing environment variable {}", name)))
        };

        let mut config = Self::new(&var(URL_VAR)?, &var(ANON_KEY_VAR)?);

        if let Some(raw) = lookup("PORTAL_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::config(format!("invalid PORTAL_REQUEST_TIMEOUT_SECS: {}", raw))
            })?;
            config.options.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}
