use academy_portal::accounts::AuthFailure;
use academy_portal::models::tables;
use academy_portal::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn jane_form(role: Role) -> RegistrationForm {
    RegistrationForm {
        full_name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        password: "secret1".to_string(),
        confirm_password: "secret1".to_string(),
        role,
    }
}

#[tokio::test]
async fn test_register_instructor_dispatches_instructor_view() {
    let backend = Arc::new(MemoryBackend::new());
    let (portal, _notices) = Portal::with_backend(backend.clone());
    portal.session().settled().await.unwrap();

    let profile = portal
        .accounts()
        .register("Jane Doe", "jane@example.com", "secret1", Role::Instructor)
        .await
        .unwrap();

    let state = portal.session().state();
    assert_eq!(state.profile.as_ref().map(|p| p.role), Some(Role::Instructor));
    assert_eq!(state.identity.as_ref().map(|i| i.id.as_str()), Some(profile.id.as_str()));
    assert_eq!(portal.dashboard(), DashboardSelection::View(DashboardView::Instructor));
    assert_eq!(portal.guard(Route::Dashboard), GuardDecision::Render);
    assert!(matches!(portal.open_dashboard(), Some(Dashboard::Instructor(_))));

    let metadata = backend.account_metadata("jane@example.com").unwrap();
    assert_eq!(metadata, json!({ "full_name": "Jane Doe", "role": "instructor" }));

    portal.shutdown().await;
}

#[tokio::test]
async fn test_failed_login_leaves_identity_unchanged() {
    let backend = Arc::new(MemoryBackend::new());
    let (portal, _notices) = Portal::with_backend(backend);
    portal.session().settled().await.unwrap();

    let err = portal
        .accounts()
        .login("jane@example.com", "secret1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthFailure::InvalidCredentials));
    assert!(portal.session().state().identity.is_none());

    portal.accounts().register_form(&jane_form(Role::Student)).await.unwrap();
    let before = portal.session().state().identity;
    assert!(before.is_some());

    let err = portal
        .accounts()
        .login("jane@example.com", "wrong-password")
        .await
        .unwrap_err();

    assert_eq!(err.message(), "Invalid email or password");
    assert_eq!(portal.session().state().identity, before);
    portal.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let (portal, _notices) = Portal::with_backend(Arc::new(MemoryBackend::new()));
    portal.accounts().register_form(&jane_form(Role::Student)).await.unwrap();

    let err = portal
        .accounts()
        .register_form(&jane_form(Role::Student))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthFailure::Rejected(ref msg) if msg == "User already registered"));
    portal.shutdown().await;
}

#[tokio::test]
async fn test_invalid_form_makes_no_backend_call() {
    let backend = Arc::new(MemoryBackend::new());
    let (portal, _notices) = Portal::with_backend(backend.clone());
    let mut form = jane_form(Role::Student);
    form.confirm_password = "different".to_string();

    let err = portal.accounts().register_form(&form).await.unwrap_err();

    assert_eq!(err.message(), "Passwords do not match");
    assert!(backend.account_metadata("jane@example.com").is_none());
    portal.shutdown().await;
}

#[tokio::test]
async fn test_profile_insert_failure_leaves_orphaned_identity() {
    let backend = Arc::new(MemoryBackend::new());
    backend.reject_inserts(tables::PROFILES);
    let (portal, _notices) = Portal::with_backend(backend.clone());

    let err = portal
        .accounts()
        .register_form(&jane_form(Role::Instructor))
        .await
        .unwrap_err();

    match err {
        AuthFailure::ProfileNotCreated { identity_id, reason } => {
            assert!(!identity_id.is_empty());
            assert!(reason.contains("row-level security"));
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(backend.account_metadata("jane@example.com").is_some());
    assert!(backend.rows(tables::PROFILES).is_empty());

    let state = portal
        .session()
        .wait_for(|s| s.identity.is_some() && !s.loading)
        .await
        .unwrap();
    assert!(state.profile.is_none());
    assert_eq!(portal.dashboard(), DashboardSelection::ProfileMissing);
    assert!(portal.open_dashboard().is_none());
    portal.shutdown().await;
}

#[tokio::test]
async fn test_logout_redirects_protected_route() {
    let (portal, _notices) = Portal::with_backend(Arc::new(MemoryBackend::new()));
    portal.accounts().register_form(&jane_form(Role::Admin)).await.unwrap();
    assert_eq!(portal.guard(Route::Dashboard), GuardDecision::Render);

    let mut state = portal.session().subscribe();
    portal.accounts().logout().await.unwrap();
    let decision = academy_portal::routing::RouteGuard::new(Route::Dashboard)
        .follow(&mut state, GuardDecision::Render)
        .await
        .unwrap();

    assert_eq!(decision, GuardDecision::Redirect(Route::Login));
    assert!(portal.session().state().profile.is_none());

    // already signed out
    portal.accounts().logout().await.unwrap();
    portal.shutdown().await;
}

#[tokio::test]
async fn test_existing_session_is_resolved_on_start() {
    let backend = Arc::new(MemoryBackend::new());
    let identity = backend
        .create_identity("ada@example.com", "secret1", None)
        .await
        .unwrap();
    backend
        .seed(
            tables::PROFILES,
            vec![json!({
                "id": identity.id,
                "email": "ada@example.com",
                "full_name": "Ada",
                "role": "admin"
            })],
        )
        .unwrap();

    let (portal, _notices) = Portal::with_backend(backend);
    assert_eq!(portal.dashboard(), DashboardSelection::Pending);

    portal.session().settled().await.unwrap();
    assert_eq!(portal.dashboard(), DashboardSelection::View(DashboardView::Admin));
    portal.shutdown().await;
}
