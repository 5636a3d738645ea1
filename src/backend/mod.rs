//! Capability contract for the hosted backend
//!
//! The portal never talks to the auth service or row storage directly; it
//! goes through [`Backend`]. [`SupabaseBackend`] is the production adapter
//! and [`MemoryBackend`] a process-local implementation of the same contract.

mod memory;
mod query;
mod supabase;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::models::Identity;

pub use memory::MemoryBackend;
pub use query::{Filter, Order, Query};
pub use supabase::SupabaseBackend;

/// What happened to the signed-in identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Emitted by the backend whenever the signed-in identity changes
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEvent {
    pub kind: IdentityEventKind,
    pub identity: Option<Identity>,
}

/// Auth and row-storage operations the portal relies on
#[async_trait]
pub trait Backend: Send + Sync {
    /// Sign in with email and password
    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, Error>;

    /// Register a new identity; `metadata` is stored with it
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Identity, Error>;

    /// The identity currently signed in, if any
    async fn current_identity(&self) -> Option<Identity>;

    /// Register a listener for identity changes
    fn on_identity_change(&self) -> broadcast::Receiver<IdentityEvent>;

    async fn sign_out(&self) -> Result<(), Error>;

    async fn select(&self, query: &Query) -> Result<Vec<Value>, Error>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> Result<Value, Error>;

    async fn count(&self, query: &Query) -> Result<u64, Error>;
}

/// Select rows and deserialize them
pub async fn fetch<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Vec<T>, Error> {
    backend
        .select(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// First matching row, if any
pub async fn fetch_one<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Option<T>, Error> {
    let query = query.clone().limit(1);
    Ok(fetch(backend, &query).await?.into_iter().next())
}

/// Insert a typed row and deserialize what the backend stored
pub async fn insert_row<T: Serialize, R: DeserializeOwned>(
    backend: &dyn Backend,
    table: &str,
    row: &T,
) -> Result<R, Error> {
    let stored = backend.insert(table, serde_json::to_value(row)?).await?;
    Ok(serde_json::from_value(stored)?)
}
