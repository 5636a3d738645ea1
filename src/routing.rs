//! Route guard and role dispatch
//!
//! Both are pure functions of the published [`SessionState`]; the async
//! helpers only re-evaluate them as the state changes.

use tokio::sync::watch;

use crate::error::Error;
use crate::models::Role;
use crate::session::SessionState;

/// Navigable entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    Dashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/dashboard",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        match path {
            "" => Some(Route::Home),
            "/login" => Some(Route::Login),
            "/register" => Some(Route::Register),
            "/dashboard" => Some(Route::Dashboard),
            _ => None,
        }
    }

    /// Requires a signed-in identity
    pub fn is_protected(&self) -> bool {
        matches!(self, Route::Dashboard)
    }
}

/// What to show for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving: show a neutral placeholder, do not redirect
    Pending,
    Render,
    Redirect(Route),
}

/// Gate for protected routes
#[derive(Debug, Clone, Copy)]
pub struct RouteGuard {
    route: Route,
}

impl RouteGuard {
    pub fn new(route: Route) -> Self {
        Self { route }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn decide(route: Route, state: &SessionState) -> GuardDecision {
        if !route.is_protected() {
            return GuardDecision::Render;
        }
        if state.loading {
            GuardDecision::Pending
        } else if state.identity.is_some() {
            GuardDecision::Render
        } else {
            GuardDecision::Redirect(Route::Login)
        }
    }

    pub fn current(&self, state: &watch::Receiver<SessionState>) -> GuardDecision {
        Self::decide(self.route, &state.borrow())
    }

    /// Wait for the decision to differ from `last`. Fails with
    /// [`Error::Cancelled`] once the session store is gone.
    pub async fn follow(
        &self,
        state: &mut watch::Receiver<SessionState>,
        last: GuardDecision,
    ) -> Result<GuardDecision, Error> {
        let route = self.route;
        let state = state
            .wait_for(|state| Self::decide(route, state) != last)
            .await
            .map_err(|_| Error::Cancelled)?;
        Ok(Self::decide(route, &state))
    }
}

/// Dashboard variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardView {
    Admin,
    Instructor,
    Student,
}

impl DashboardView {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Admin => DashboardView::Admin,
            Role::Instructor => DashboardView::Instructor,
            Role::Student => DashboardView::Student,
        }
    }
}

/// Outcome of role dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardSelection {
    /// Session still loading
    Pending,
    /// Loaded, but no profile could be resolved. Never falls back to a view.
    ProfileMissing,
    View(DashboardView),
}

pub fn dispatch(state: &SessionState) -> DashboardSelection {
    if state.loading {
        return DashboardSelection::Pending;
    }
    match &state.profile {
        Some(profile) => DashboardSelection::View(DashboardView::for_role(profile.role)),
        None => DashboardSelection::ProfileMissing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, Profile};
    use chrono::Utc;

    fn state(loading: bool, role: Option<Role>) -> SessionState {
        let identity = role.map(|_| Identity {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
        });
        let profile = role.map(|role| Profile {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            full_name: "User One".to_string(),
            role,
            avatar_url: None,
            created_at: Utc::now(),
            updated_at: None,
        });
        SessionState {
            identity,
            profile,
            loading,
        }
    }

    #[test]
    fn loading_never_redirects() {
        assert_eq!(
            RouteGuard::decide(Route::Dashboard, &state(true, None)),
            GuardDecision::Pending
        );
    }

    #[test]
    fn signed_out_redirects_from_every_protected_route() {
        let routes = [Route::Home, Route::Login, Route::Register, Route::Dashboard];
        for route in routes.into_iter().filter(Route::is_protected) {
            assert_eq!(
                RouteGuard::decide(route, &state(false, None)),
                GuardDecision::Redirect(Route::Login)
            );
        }
        assert_eq!(
            RouteGuard::decide(Route::Login, &state(false, None)),
            GuardDecision::Render
        );
    }

    #[test]
    fn identity_without_profile_still_renders() {
        let mut session = state(false, Some(Role::Student));
        session.profile = None;

        assert_eq!(
            RouteGuard::decide(Route::Dashboard, &session),
            GuardDecision::Render
        );
        assert_eq!(dispatch(&session), DashboardSelection::ProfileMissing);
    }

    #[test]
    fn dispatch_follows_role() {
        assert_eq!(
            dispatch(&state(false, Some(Role::Admin))),
            DashboardSelection::View(DashboardView::Admin)
        );
        assert_eq!(
            dispatch(&state(false, Some(Role::Instructor))),
            DashboardSelection::View(DashboardView::Instructor)
        );
        assert_eq!(
            dispatch(&state(false, Some(Role::parse("superuser")))),
            DashboardSelection::View(DashboardView::Student)
        );
        assert_eq!(
            dispatch(&state(true, Some(Role::Admin))),
            DashboardSelection::Pending
        );
    }

    #[test]
    fn paths_round_trip() {
        assert_eq!(Route::from_path("/dashboard/"), Some(Route::Dashboard));
        assert_eq!(Route::from_path("/"), Some(Route::Home));
        assert_eq!(Route::from_path("/nope"), None);
        assert_eq!(Route::Register.path(), "/register");
    }

    #[tokio::test]
    async fn follow_reacts_to_sign_out() {
        let (tx, mut rx) = watch::channel(state(false, Some(Role::Student)));
        let guard = RouteGuard::new(Route::Dashboard);
        assert_eq!(guard.current(&rx), GuardDecision::Render);

        tx.send_replace(state(false, None));

        let next = guard.follow(&mut rx, GuardDecision::Render).await.unwrap();
        assert_eq!(next, GuardDecision::Redirect(Route::Login));
    }
}
