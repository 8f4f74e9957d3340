mod common;

use common::*;
use futures_util::future::join_all;
use tokenkeeper::application_port::*;
use tokenkeeper::metrics::Metric;

#[tokio::test]
async fn login_refresh_replay_scenario() {
    let h = Harness::new();
    let user_id = h.register("alice").await;

    let first = h.login("alice").await;
    assert_eq!(first.user_id, user_id);
    let access = h
        .service
        .verify_token(&first.tokens.access_token.0)
        .await
        .unwrap();
    assert_eq!(access.user_id, user_id);

    let second = h
        .service
        .refresh_token(&first.tokens.refresh_token.0)
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.tokens.refresh_token);

    let replay = h.service.refresh_token(&first.tokens.refresh_token.0).await;
    assert!(matches!(replay, Err(AuthError::InvalidRefreshToken)));

    let third = h
        .service
        .refresh_token(&second.refresh_token.0)
        .await
        .unwrap();
    h.service
        .verify_token(&third.access_token.0)
        .await
        .unwrap();

    assert_eq!(h.refresh.rows_for_user(user_id).await.len(), 1);
    assert_eq!(h.metrics.get(Metric::RefreshRotated), 2);
    assert_eq!(h.metrics.get(Metric::RefreshReplayRejected), 1);
}

#[tokio::test]
async fn concurrent_refreshes_rotate_exactly_once() {
    let h = Harness::new();
    h.register("bob").await;
    let login = h.login("bob").await;
    let raw = login.tokens.refresh_token.0.clone();

    let results = join_all((0..16).map(|_| h.service.refresh_token(&raw))).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let replayed = results
        .iter()
        .filter(|r| matches!(r, Err(AuthError::InvalidRefreshToken)))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(replayed, 15);
    assert_eq!(h.refresh.rows_for_user(login.user_id).await.len(), 1);
}

#[tokio::test]
async fn login_beyond_cap_evicts_oldest() {
    let h = Harness::new();
    let user_id = h.register("carol").await;
    let cap = h.policy.max_refresh_tokens_per_user as usize;

    let mut sessions = Vec::new();
    for _ in 0..=cap {
        sessions.push(h.login("carol").await);
        h.advance(chrono::Duration::seconds(1));
    }

    let rows = h.refresh.rows_for_user(user_id).await;
    assert_eq!(rows.len(), cap);
    assert_eq!(h.metrics.get(Metric::RefreshEvicted), 1);

    let oldest = h
        .service
        .refresh_token(&sessions[0].tokens.refresh_token.0)
        .await;
    assert!(matches!(oldest, Err(AuthError::InvalidRefreshToken)));
    for session in &sessions[1..] {
        h.service
            .refresh_token(&session.tokens.refresh_token.0)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn expired_refresh_token_is_deleted_and_rejected() {
    let h = Harness::new();
    let user_id = h.register("dave").await;
    let login = h.login("dave").await;

    // Expiry is inclusive.
    h.advance(h.policy.refresh_ttl);

    let expired = h
        .service
        .refresh_token(&login.tokens.refresh_token.0)
        .await;
    assert!(matches!(expired, Err(AuthError::RefreshTokenExpired)));
    assert!(h.refresh.rows_for_user(user_id).await.is_empty());

    let again = h
        .service
        .refresh_token(&login.tokens.refresh_token.0)
        .await;
    assert!(matches!(again, Err(AuthError::InvalidRefreshToken)));
}

#[tokio::test]
async fn malformed_refresh_token_is_rejected_without_lookup() {
    let h = Harness::new();
    let upper = "A".repeat(64);
    let short = "a".repeat(63);
    for raw in ["", "not-hex", upper.as_str(), short.as_str()] {
        let r = h.service.refresh_token(raw).await;
        assert!(matches!(r, Err(AuthError::InvalidRefreshToken)), "{raw:?}");
    }
}

#[tokio::test]
async fn access_token_expires_with_the_clock() {
    let h = Harness::new();
    h.register("erin").await;
    let login = h.login("erin").await;

    h.advance(chrono::Duration::minutes(14));
    h.service
        .verify_token(&login.tokens.access_token.0)
        .await
        .unwrap();

    h.advance(chrono::Duration::minutes(1));
    let r = h.service.verify_token(&login.tokens.access_token.0).await;
    assert!(matches!(r, Err(AuthError::AccessTokenExpired)));
}

#[tokio::test]
async fn forged_access_token_is_invalid() {
    let h = Harness::new();
    h.register("frank").await;
    h.register("mallory").await;
    let frank = h.login("frank").await.tokens.access_token.0;
    let mallory = h.login("mallory").await.tokens.access_token.0;

    // frank's claims under mallory's signature
    let f: Vec<&str> = frank.split('.').collect();
    let m: Vec<&str> = mallory.split('.').collect();
    let forged = format!("{}.{}.{}", f[0], f[1], m[2]);

    let r = h.service.verify_token(&forged).await;
    assert!(matches!(r, Err(AuthError::InvalidAccessToken)));
    let r = h.service.verify_token("not.a.jwt").await;
    assert!(matches!(r, Err(AuthError::InvalidAccessToken)));
}

#[tokio::test]
async fn signup_validates_and_rejects_duplicates() {
    let h = Harness::new();

    let long = "x".repeat(33);
    let cases = [
        ("ab", PASSWORD),
        ("has space", PASSWORD),
        ("ünicode", PASSWORD),
        (long.as_str(), PASSWORD),
        ("valid_name", "short"),
    ];
    for (username, password) in cases {
        let r = h
            .service
            .signup(SignupInput {
                username: username.into(),
                password: password.into(),
            })
            .await;
        assert!(matches!(r, Err(AuthError::Validation(_))), "{username:?}");
    }

    h.register("grace.h-1").await;
    let dup = h
        .service
        .signup(SignupInput {
            username: "grace.h-1".into(),
            password: PASSWORD.into(),
        })
        .await;
    assert!(matches!(dup, Err(AuthError::UsernameTaken)));
    assert_eq!(h.metrics.get(Metric::Registered), 1);
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let h = Harness::new();
    h.register("heidi").await;

    let unknown = h
        .service
        .login(LoginInput {
            username: "nobody".into(),
            password: PASSWORD.into(),
        })
        .await;
    let wrong = h
        .service
        .login(LoginInput {
            username: "heidi".into(),
            password: "wrong password".into(),
        })
        .await;

    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    assert_eq!(h.metrics.get(Metric::LoginFailed), 2);
    assert_eq!(h.refresh.len().await, 0);
}
