//! Backend adapter for a hosted Supabase project

use academy_portal_auth::{
    Auth, AuthChangeEvent, AuthError, AuthOptions, AuthStateChange, Session, User,
};
use academy_portal_postgrest::{PostgrestClient, SortOrder};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

use super::{Backend, Filter, IdentityEvent, IdentityEventKind, Query};
use crate::config::ClientOptions;
use crate::error::Error;
use crate::models::Identity;

/// Wait before retrying a token refresh that failed on the network
const REFRESH_RETRY: Duration = Duration::from_secs(15);

/// [`Backend`] over the auth and REST endpoints of a Supabase project.
///
/// Two background tasks run for the lifetime of the adapter: one forwards
/// auth-state changes as identity events, the other refreshes the access
/// token `refresh_margin` before it expires.
pub struct SupabaseBackend {
    url: String,
    key: String,
    http_client: Client,
    auth: Arc<Auth>,
    events: broadcast::Sender<IdentityEvent>,
    forwarder: JoinHandle<()>,
    refresher: JoinHandle<()>,
}

impl SupabaseBackend {
    /// Create the adapter. Must be called inside a Tokio runtime because
    /// its background tasks are spawned here.
    pub fn new(supabase_url: &str, supabase_key: &str, options: &ClientOptions) -> Result<Self, Error> {
        let url = Url::parse(supabase_url)?;
        let url = url.as_str().trim_end_matches('/').to_string();

        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(Error::config)?;

        let auth = Arc::new(Auth::new(
            &url,
            supabase_key,
            http_client.clone(),
            AuthOptions {
                event_capacity: options.event_capacity,
            },
        ));

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("SupabaseBackend must be created inside a Tokio runtime"))?;
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let forwarder = runtime.spawn(forward_auth_changes(
            auth.clone(),
            auth.on_auth_state_change(),
            events.clone(),
        ));
        let refresher = runtime.spawn(refresh_before_expiry(
            auth.clone(),
            auth.on_auth_state_change(),
            options.refresh_margin,
        ));

        Ok(Self {
            url,
            key: supabase_key.to_string(),
            http_client,
            auth,
            events,
            forwarder,
            refresher,
        })
    }

    /// The underlying auth client
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    fn table(&self, table: &str) -> Result<PostgrestClient, Error> {
        let client = PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone());
        match self.auth.get_session() {
            Some(session) => Ok(client.with_auth(&session.access_token)?),
            None => Ok(client),
        }
    }

    fn filtered(&self, query: &Query) -> Result<PostgrestClient, Error> {
        let mut client = self.table(&query.table)?.select("*");

        for filter in &query.filters {
            client = match filter {
                Filter::Eq(column, value) => client.eq(column, value),
                Filter::In(column, values) => {
                    let values: Vec<&str> = values.iter().map(String::as_str).collect();
                    client.in_list(column, &values)
                }
            };
        }

        if let Some(order) = &query.order {
            let direction = if order.ascending {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            client = client.order(&order.column, direction);
        }
        if let Some(limit) = query.limit {
            client = client.limit(limit);
        }

        Ok(client)
    }
}

impl Drop for SupabaseBackend {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.refresher.abort();
    }
}

fn identity_from_user(user: &User) -> Identity {
    Identity {
        id: user.id.clone(),
        email: user.email.clone().unwrap_or_default(),
    }
}

fn event_kind(event: AuthChangeEvent) -> IdentityEventKind {
    match event {
        AuthChangeEvent::SignedIn => IdentityEventKind::SignedIn,
        AuthChangeEvent::SignedOut => IdentityEventKind::SignedOut,
        AuthChangeEvent::TokenRefreshed => IdentityEventKind::TokenRefreshed,
        AuthChangeEvent::UserUpdated => IdentityEventKind::UserUpdated,
    }
}

/// State to report after auth changes were dropped: whatever session the
/// auth client holds now.
fn resync_event(auth: &Auth) -> IdentityEvent {
    match auth.get_session() {
        Some(session) => IdentityEvent {
            kind: IdentityEventKind::SignedIn,
            identity: Some(identity_from_user(&session.user)),
        },
        None => IdentityEvent {
            kind: IdentityEventKind::SignedOut,
            identity: None,
        },
    }
}

async fn forward_auth_changes(
    auth: Arc<Auth>,
    mut changes: broadcast::Receiver<AuthStateChange>,
    events: broadcast::Sender<IdentityEvent>,
) {
    loop {
        let event = match changes.recv().await {
            Ok(change) => IdentityEvent {
                kind: event_kind(change.event),
                identity: change.session.as_ref().map(|s| identity_from_user(&s.user)),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!("identity forwarder skipped {} auth changes, resyncing", skipped);
                resync_event(&auth)
            }
            Err(RecvError::Closed) => break,
        };

        let kind = event.kind;
        if events.send(event).is_err() {
            debug!("no identity listeners for {:?}", kind);
        }
    }
}

fn refresh_deadline(session: &Session, margin: Duration) -> Instant {
    let lifetime = Duration::from_secs(u64::try_from(session.expires_in).unwrap_or(0));
    Instant::now() + lifetime.saturating_sub(margin)
}

/// Keep the access token fresh. Every session change re-arms the timer; a
/// successful refresh arms it again through its own `TokenRefreshed` change.
async fn refresh_before_expiry(
    auth: Arc<Auth>,
    mut changes: broadcast::Receiver<AuthStateChange>,
    margin: Duration,
) {
    let mut deadline = auth.get_session().map(|s| refresh_deadline(&s, margin));

    loop {
        let due = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    deadline = change.session.as_ref().map(|s| refresh_deadline(s, margin));
                }
                Err(RecvError::Lagged(_)) => {
                    deadline = auth.get_session().map(|s| refresh_deadline(&s, margin));
                }
                Err(RecvError::Closed) => break,
            },
            _ = due => {
                deadline = None;
                match auth.refresh_session().await {
                    Ok(session) => info!("refreshed access token for {}", session.user.id),
                    Err(AuthError::NetworkError(e)) => {
                        warn!("token refresh failed, retrying: {}", e);
                        deadline = Some(Instant::now() + REFRESH_RETRY);
                    }
                    Err(e) => warn!("token refresh failed: {}", e),
                }
            }
        }
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        Ok(identity_from_user(&session.user))
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Identity, Error> {
        let response = self.auth.sign_up(email, password, metadata.as_ref()).await?;
        Ok(identity_from_user(response.user()))
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.auth
            .get_session()
            .map(|session| identity_from_user(&session.user))
    }

    fn on_identity_change(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), Error> {
        Ok(self.auth.sign_out().await?)
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, Error> {
        Ok(self.filtered(query)?.execute::<Value>().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, Error> {
        let stored = self.table(table)?.insert(&row).await?;
        match stored {
            Value::Array(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| Error::database(format!("insert into {} returned no rows", table))),
            Value::Null => Err(Error::database(format!(
                "insert into {} returned no representation",
                table
            ))),
            row => Ok(row),
        }
    }

    async fn count(&self, query: &Query) -> Result<u64, Error> {
        Ok(self.filtered(query)?.count().await?)
    }
}
