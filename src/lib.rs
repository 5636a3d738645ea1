//! Academy Portal client library
//!
//! Session handling, role routing and role-scoped dashboards for the training
//! institute portal, on top of a hosted Supabase project.
//!
//! A [`Portal`] owns one [`SessionStore`]. Views ask the route guard whether
//! they may render, the dispatcher picks a dashboard for the signed-in role,
//! and each panel loads its slice of data under a cancellation scope tied to
//! the session's lifetime.

pub mod accounts;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod panels;
pub mod routing;
pub mod session;

use std::sync::Arc;

use crate::accounts::Accounts;
use crate::backend::{Backend, SupabaseBackend};
use crate::config::PortalConfig;
use crate::error::Error;
use crate::events::EventsBoard;
use crate::notify::{NoticeReceiver, Notifier};
use crate::panels::{AdminPanel, InstructorPanel, StudentPanel};
use crate::routing::{DashboardSelection, DashboardView, GuardDecision, Route, RouteGuard};
use crate::session::SessionStore;

/// The main entry point for the portal client
pub struct Portal {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    accounts: Accounts,
    notifier: Notifier,
}

impl Portal {
    /// Build a portal over any backend. Must be called inside a Tokio
    /// runtime; the returned receiver yields panel notices.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use academy_portal::{backend::MemoryBackend, Portal};
    ///
    /// # tokio_test::block_on(async {
    /// let (portal, _notices) = Portal::with_backend(Arc::new(MemoryBackend::new()));
    /// let state = portal.session().settled().await.unwrap();
    /// assert!(!state.is_signed_in());
    /// portal.shutdown().await;
    /// # });
    /// ```
    pub fn with_backend(backend: Arc<dyn Backend>) -> (Self, NoticeReceiver) {
        let session = Arc::new(SessionStore::start(backend.clone()));
        let accounts = Accounts::new(backend.clone(), session.clone());
        let (notifier, notices) = Notifier::channel();

        (
            Self {
                backend,
                session,
                accounts,
                notifier,
            },
            notices,
        )
    }

    /// Connect to the Supabase project described by `config`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use academy_portal::{config::PortalConfig, Portal};
    ///
    /// # async fn run() -> Result<(), academy_portal::error::Error> {
    /// let config = PortalConfig::from_env()?;
    /// let (portal, _notices) = Portal::connect(&config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(config: &PortalConfig) -> Result<(Self, NoticeReceiver), Error> {
        let backend = SupabaseBackend::new(&config.supabase_url, &config.anon_key, &config.options)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Guard decision for `route` against the current session
    pub fn guard(&self, route: Route) -> GuardDecision {
        RouteGuard::decide(route, &self.session.state())
    }

    /// Which dashboard the current session maps to
    pub fn dashboard(&self) -> DashboardSelection {
        routing::dispatch(&self.session.state())
    }

    /// Build the panel for the current profile. `None` until a profile is
    /// resolved. The panel is not loaded yet.
    pub fn open_dashboard(&self) -> Option<Dashboard> {
        let state = self.session.state();
        let profile = match routing::dispatch(&state) {
            DashboardSelection::View(_) => state.profile?,
            DashboardSelection::Pending | DashboardSelection::ProfileMissing => return None,
        };

        let backend = self.backend.clone();
        let notifier = self.notifier.clone();
        let scope = self.session.scope();
        let dashboard = match DashboardView::for_role(profile.role) {
            DashboardView::Admin => Dashboard::Admin(AdminPanel::new(backend, notifier, scope)),
            DashboardView::Instructor => {
                Dashboard::Instructor(InstructorPanel::new(backend, profile, notifier, scope))
            }
            DashboardView::Student => {
                Dashboard::Student(StudentPanel::new(backend, profile, notifier, scope))
            }
        };
        Some(dashboard)
    }

    /// Public events listing
    pub fn events(&self) -> EventsBoard {
        EventsBoard::new(self.backend.clone(), self.notifier.clone(), self.session.scope())
    }

    /// Stop the session store; every open panel's scope is cancelled
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

/// A dashboard panel for one role
pub enum Dashboard {
    Admin(AdminPanel),
    Instructor(InstructorPanel),
    Student(StudentPanel),
}

impl Dashboard {
    pub fn view(&self) -> DashboardView {
        match self {
            Dashboard::Admin(_) => DashboardView::Admin,
            Dashboard::Instructor(_) => DashboardView::Instructor,
            Dashboard::Student(_) => DashboardView::Student,
        }
    }

    pub async fn load(&mut self) -> Result<(), Error> {
        match self {
            Dashboard::Admin(panel) => panel.load().await,
            Dashboard::Instructor(panel) => panel.load().await,
            Dashboard::Student(panel) => panel.load().await,
        }
    }

    pub fn close(&self) {
        match self {
            Dashboard::Admin(panel) => panel.close(),
            Dashboard::Instructor(panel) => panel.close(),
            Dashboard::Student(panel) => panel.close(),
        }
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::accounts::{AuthFailure, RegistrationForm};
    pub use crate::backend::{Backend, MemoryBackend, SupabaseBackend};
    pub use crate::config::{ClientOptions, PortalConfig};
    pub use crate::error::Error;
    pub use crate::models::{Course, Event, Profile, Role};
    pub use crate::notify::{Notice, NoticeLevel};
    pub use crate::routing::{DashboardSelection, DashboardView, GuardDecision, Route};
    pub use crate::session::SessionState;
    pub use crate::{Dashboard, Portal};
}
