//! Session store
//!
//! Single source of truth for who is signed in and what their profile is.
//! One background task owns every transition: it resolves the initial
//! identity, then serves identity-change events and refresh requests in
//! arrival order. Consumers observe the result through a `watch` channel.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{self, Backend, IdentityEvent, Query};
use crate::error::Error;
use crate::models::{tables, Identity, Profile};

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionState {
    fn loading() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }
}

enum Command {
    Refresh(oneshot::Sender<()>),
}

/// Owned session context. Start it once per client runtime and shut it down
/// on exit; view scopes handed out by [`SessionStore::scope`] end with it.
pub struct SessionStore {
    state: watch::Receiver<SessionState>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Start the store. Must be called inside a Tokio runtime.
    pub fn start(backend: Arc<dyn Backend>) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::loading());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        // Listen before resolving so no change between the two is missed
        let events = backend.on_identity_change();
        let task = tokio::spawn(run(
            backend,
            state_tx,
            events,
            command_rx,
            shutdown.clone(),
        ));

        Self {
            state: state_rx,
            commands,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Current snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the first resolution has finished
    pub async fn settled(&self) -> Result<SessionState, Error> {
        self.wait_for(|state| !state.loading).await
    }

    /// Wait until `predicate` holds for the published state
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionState, Error>
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| Error::Cancelled)?;
        Ok(state.clone())
    }

    /// Re-resolve identity and profile now. Returns once the new state is
    /// published.
    pub async fn refresh(&self) -> Result<SessionState, Error> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Refresh(ack))
            .map_err(|_| Error::Cancelled)?;
        done.await.map_err(|_| Error::Cancelled)?;
        Ok(self.state())
    }

    /// Token for work tied to a view; cancelled when the store shuts down
    pub fn scope(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Stop the background task and wait for it to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    backend: Arc<dyn Backend>,
    state: watch::Sender<SessionState>,
    mut events: broadcast::Receiver<IdentityEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    let initial = backend.current_identity().await;
    publish(&state, backend.as_ref(), initial).await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("session store shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    debug!("identity event {:?}", event.kind);
                    publish(&state, backend.as_ref(), event.identity).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("missed {} identity events, re-resolving", skipped);
                    let identity = backend.current_identity().await;
                    publish(&state, backend.as_ref(), identity).await;
                }
                Err(RecvError::Closed) => {
                    info!("identity events closed, session store stopping");
                    break;
                }
            },
            Some(command) = commands.recv() => match command {
                Command::Refresh(ack) => {
                    let identity = backend.current_identity().await;
                    publish(&state, backend.as_ref(), identity).await;
                    let _ = ack.send(());
                }
            },
        }
    }
}

/// Resolve the profile for `identity` and publish identity and profile
/// together, so consumers never see one without the other.
async fn publish(
    state: &watch::Sender<SessionState>,
    backend: &dyn Backend,
    identity: Option<Identity>,
) {
    let profile = match &identity {
        Some(identity) => load_profile(backend, identity).await,
        None => None,
    };

    state.send_replace(SessionState {
        identity,
        profile,
        loading: false,
    });
}

async fn load_profile(backend: &dyn Backend, identity: &Identity) -> Option<Profile> {
    let query = Query::table(tables::PROFILES).eq("id", &identity.id);
    match backend::fetch_one::<Profile>(backend, &query).await {
        Ok(Some(profile)) => Some(profile),
        Ok(None) => {
            warn!("no profile row for identity {}", identity.id);
            None
        }
        Err(e) => {
            error!("failed to fetch profile for {}: {}", identity.id, e);
            None
        }
    }
}
