//! End-to-end session scenarios against the in-process authority.
//!
//! Most scenarios use its simulated latency with time paused, so the delays
//! resolve instantly but still interleave concurrent callers the way a slow
//! server would. The multi-thread scenario drops the latency and races real
//! worker threads instead.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Barrier;

use sessionguard_core::auth::MemoryStore;
use sessionguard_core::authority::{Latency, TokenKind};
use sessionguard_core::{
    AccessCredential, ApiError, AuthorityTransport, CredentialAuthority, RefreshCredential,
    RefreshTokenStore, ResumeOutcome, RotationPolicy, SessionController, SessionEvent,
};

struct Harness {
    authority: Arc<CredentialAuthority>,
    persisted: Arc<MemoryStore>,
    controller: Arc<SessionController>,
}

fn harness_with(authority: CredentialAuthority, persisted: MemoryStore) -> Harness {
    build(authority.with_latency(Latency::simulated()), persisted)
}

fn build(authority: CredentialAuthority, persisted: MemoryStore) -> Harness {
    let authority = Arc::new(authority);
    let persisted = Arc::new(persisted);
    let transport = Arc::new(AuthorityTransport::new(Arc::clone(&authority)));
    let controller = Arc::new(SessionController::new(transport, persisted.clone()));
    Harness {
        authority,
        persisted,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(CredentialAuthority::new(), MemoryStore::new())
}

async fn signed_in() -> Harness {
    let h = harness();
    h.controller
        .login("demo@example.com", "password123")
        .await
        .unwrap();
    h
}

/// Replace the access token with one that expired a moment ago.
fn expire_access(h: &Harness) {
    let expired = h.authority.mint(
        "demo@example.com",
        Some("user"),
        TokenKind::Access,
        Utc::now().timestamp_millis() - 1_000,
    );
    let store = h.controller.store();
    let mut session = store.get().unwrap();
    session.access = Some(AccessCredential::new(expired));
    store.set(session);
}

fn far_future() -> i64 {
    Utc::now().timestamp_millis() + 24 * 3_600_000
}

#[tokio::test(start_paused = true)]
async fn test_login_then_profile() {
    let h = signed_in().await;

    let profile = h.controller.profile().await.unwrap();
    assert_eq!(profile.email, "demo@example.com");
    assert_eq!(profile.name, "Demo User");
    assert_eq!(profile.role, "user");
    assert_eq!(h.authority.calls().refresh, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_secret_creates_no_session() {
    let h = harness();

    let err = h
        .controller
        .login("demo@example.com", "hunter2")
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::InvalidCredentials);
    assert!(h.controller.store().get().is_none());
    assert_eq!(h.persisted.load().unwrap(), None);

    let err = h
        .controller
        .login("nobody@example.com", "password123")
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::InvalidCredentials);
}

#[tokio::test(start_paused = true)]
async fn test_expired_access_token_refreshes_exactly_once() {
    let h = signed_in().await;
    expire_access(&h);

    let data = h.controller.protected_data().await.unwrap();
    assert_eq!(
        data.items,
        vec!["Secure Item 1", "Secure Item 2", "Secure Item 3", "Secure Item 4"]
    );
    let calls = h.authority.calls();
    assert_eq!(calls.refresh, 1);
    assert_eq!(calls.protected, 1);
    assert!(h.controller.store().get().unwrap().has_valid_access());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_expired_requests_share_one_refresh() {
    let h = signed_in().await;
    expire_access(&h);
    let mut events = h.controller.subscribe();

    let calls = (0..10).map(|_| {
        let controller = Arc::clone(&h.controller);
        async move { controller.dispatcher().fetch_protected_data().await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    let calls = h.authority.calls();
    assert_eq!(calls.refresh, 1);
    assert_eq!(calls.protected, 10);
    assert!(matches!(
        events.try_recv().unwrap(),
        SessionEvent::Refreshed { .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_refresh_is_single_flight_across_threads() {
    for round in 0..50 {
        let h = build(
            CredentialAuthority::new().with_latency(Latency::none()),
            MemoryStore::new(),
        );
        h.controller
            .login("demo@example.com", "password123")
            .await
            .unwrap();
        expire_access(&h);

        let barrier = Arc::new(Barrier::new(32));
        let tasks = (0..32).map(|_| {
            let controller = Arc::clone(&h.controller);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                controller.dispatcher().fetch_protected_data().await
            })
        });
        let results = join_all(tasks).await;

        assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
        assert_eq!(h.authority.calls().refresh, 1, "round {}", round);
        assert_eq!(h.authority.calls().protected, 32);
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_rejected_requests_share_one_refresh() {
    let h = signed_in().await;
    // Looks unexpired locally, so every request is sent and rejected
    let store = h.controller.store();
    let mut session = store.get().unwrap();
    session.access = Some(AccessCredential::new("e30.e30.mock_sig_tampered"));
    store.set(session);

    let calls = (0..6).map(|_| {
        let controller = Arc::clone(&h.controller);
        async move { controller.dispatcher().fetch_profile().await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    let calls = h.authority.calls();
    assert_eq!(calls.refresh, 1);
    // One rejected send and one retry each
    assert_eq!(calls.profile, 12);
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_refresh_token_fails_every_caller() {
    let h = signed_in().await;
    expire_access(&h);
    let store = h.controller.store();
    let mut session = store.get().unwrap();
    session.refresh = RefreshCredential::new("corrupted");
    store.set(session);
    let mut events = h.controller.subscribe();

    let calls = (0..5).map(|_| {
        let controller = Arc::clone(&h.controller);
        async move { controller.dispatcher().fetch_protected_data().await }
    });
    let results = join_all(calls).await;

    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap_err() == &ApiError::InvalidOrExpiredToken));
    assert_eq!(h.authority.calls().refresh, 1);
    assert_eq!(h.authority.calls().protected, 0);
    assert!(h.controller.store().get().is_none());
    assert_eq!(h.persisted.load().unwrap(), None);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    assert!(!h.controller.coordinator().is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_resume_from_persisted_token() {
    let token = CredentialAuthority::new().mint(
        "demo@example.com",
        None,
        TokenKind::Refresh,
        far_future(),
    );
    let h = harness_with(CredentialAuthority::new(), MemoryStore::with_token(token));

    let waiter = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.wait_until_ready().await })
    };
    let outcome = h.controller.resume().await;
    waiter.await.unwrap();

    assert!(matches!(outcome, ResumeOutcome::Authenticated(ref p) if p.email == "demo@example.com"));
    assert!(h.controller.is_authenticated());
    assert_eq!(h.controller.user().unwrap().name, "Demo User");
    assert_eq!(h.authority.calls().refresh, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_garbage_token_signs_out() {
    let h = harness_with(CredentialAuthority::new(), MemoryStore::with_token("not-a-token"));

    assert_eq!(h.controller.resume().await, ResumeOutcome::Unauthenticated);
    assert!(h.controller.is_ready());
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.persisted.load().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_rotated_refresh_token_is_persisted() {
    let h = harness_with(
        CredentialAuthority::new().with_rotation(RotationPolicy::Rotate),
        MemoryStore::new(),
    );
    h.controller
        .login("demo@example.com", "password123")
        .await
        .unwrap();
    let original = h.persisted.load().unwrap().unwrap();
    expire_access(&h);

    h.controller.protected_data().await.unwrap();

    let current = h.controller.store().current_refresh_credential().unwrap();
    assert_ne!(current.as_str(), original);
    assert_eq!(h.persisted.load().unwrap().as_deref(), Some(current.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_logout_clears_cache_and_notifies() {
    let h = signed_in().await;
    h.controller.profile().await.unwrap();
    h.controller.protected_data().await.unwrap();
    assert_eq!(h.controller.cache().len(), 2);
    let mut events = h.controller.subscribe();

    h.controller.logout();

    assert!(h.controller.cache().is_empty());
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.persisted.load().unwrap(), None);
    let event = events.recv().await.unwrap();
    assert_eq!(event, SessionEvent::SignedOut);
    assert!(event.clears_data());

    let err = h.controller.profile().await.unwrap_err();
    assert_eq!(err, ApiError::InvalidOrExpiredToken);
    // A fetch while signed out is not a session expiry
    assert!(events.try_recv().is_err());
}
