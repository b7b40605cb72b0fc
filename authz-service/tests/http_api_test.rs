mod common;

use authz_service::build_router;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{seed_user, test_env, test_env_with_login_quota, test_state, TestEnv, PASSWORD};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

async fn router(env: &TestEnv) -> Router {
    build_router(test_state(env)).await.expect("router")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_bearer(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Drive a full login through the HTTP surface and return the token pair.
async fn login(app: &Router, email: &str) -> Value {
    let response = app
        .clone()
        .oneshot(post_json(
            "/auth/login",
            json!({ "email": email, "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn login_returns_tokens_and_principal() {
    let env = test_env();
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &["risk_analyst"]);
    env.directory.grant("risk_analyst", "assessment.read");
    let app = router(&env).await;

    let body = login(&app, "analyst@acme.test").await;
    assert!(body["access_token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["principal"]["email"], "analyst@acme.test");
}

#[tokio::test]
async fn login_failure_is_a_generic_401() {
    let env = test_env();
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &[]);
    let app = router(&env).await;

    let response = app
        .oneshot(post_json(
            "/auth/login",
            json!({ "email": "analyst@acme.test", "password": "wrong" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    // No hint of which sub-case failed.
    let message = body["error"].as_str().unwrap();
    assert!(!message.to_lowercase().contains("password"));
    assert!(!message.to_lowercase().contains("lock"));
}

#[tokio::test]
async fn login_quota_spends_one_cell_per_attempt() {
    let env = test_env_with_login_quota(5);
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &[]);
    let app = router(&env).await;

    // The full quota is usable; only the attempt past it is rejected.
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/auth/login",
                json!({ "email": "analyst@acme.test", "password": PASSWORD }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(post_json(
            "/auth/login",
            json!({ "email": "analyst@acme.test", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn protected_route_requires_a_token() {
    let env = test_env();
    let app = router(&env).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/me")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rejected_access_token_leaves_an_audit_trail() {
    let env = test_env();
    let app = router(&env).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/me")
                .header("authorization", "Bearer not-a-token")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let recorded = env.audit_sink.recorded();
    assert!(recorded.iter().any(|e| {
        e.action == "token_validation"
            && e.outcome == "denied"
            && e.ip_address == "203.0.113.7"
    }));
}

#[tokio::test]
async fn me_returns_the_principal_with_permissions() {
    let env = test_env();
    let tenant = Uuid::new_v4();
    seed_user(&env, Some(tenant), "analyst@acme.test", &["risk_analyst"]);
    env.directory.grant("risk_analyst", "assessment.read");
    let app = router(&env).await;

    let tokens = login(&app, "analyst@acme.test").await;
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/me")
                .header(
                    "authorization",
                    format!("Bearer {}", tokens["access_token"].as_str().unwrap()),
                )
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["principal"]["email"], "analyst@acme.test");
    assert_eq!(body["tenant_id"], json!(tenant.to_string()));
    assert!(body["permissions"]
        .as_array()
        .unwrap()
        .contains(&json!("assessment.read")));
}

#[tokio::test]
async fn admin_route_denies_without_the_permission() {
    let env = test_env();
    let tenant = Uuid::new_v4();
    seed_user(&env, Some(tenant), "analyst@acme.test", &["risk_analyst"]);
    env.directory.grant("risk_analyst", "assessment.read");
    let target = seed_user(&env, Some(tenant), "victim@acme.test", &[]);
    let app = router(&env).await;

    let tokens = login(&app, "analyst@acme.test").await;
    let response = app
        .oneshot(post_json_bearer(
            &format!("/auth/admin/principals/{}/force-logout", target.user_id),
            tokens["access_token"].as_str().unwrap(),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_route_allows_with_the_permission() {
    let env = test_env();
    let tenant = Uuid::new_v4();
    seed_user(&env, Some(tenant), "admin@acme.test", &["tenant_admin"]);
    env.directory.grant("tenant_admin", "principal.revoke");
    let target = seed_user(&env, Some(tenant), "victim@acme.test", &[]);
    let app = router(&env).await;

    let _victim_tokens = login(&app, "victim@acme.test").await;
    let tokens = login(&app, "admin@acme.test").await;
    let response = app
        .oneshot(post_json_bearer(
            &format!("/auth/admin/principals/{}/force-logout", target.user_id),
            tokens["access_token"].as_str().unwrap(),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["revoked_sessions"], 1);
}

#[tokio::test]
async fn logout_then_reuse_is_rejected() {
    let env = test_env();
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &[]);
    let app = router(&env).await;

    let tokens = login(&app, "analyst@acme.test").await;
    let access = tokens["access_token"].as_str().unwrap().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json_bearer(
            "/auth/logout",
            &access,
            json!({ "refresh_token": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The revoked access token no longer opens protected routes.
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/me")
                .header("authorization", format!("Bearer {}", access))
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_presents_the_refresh_token_as_bearer() {
    let env = test_env();
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &[]);
    let app = router(&env).await;

    let tokens = login(&app, "analyst@acme.test").await;
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json_bearer("/auth/refresh", &refresh, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["access_token"].as_str().is_some());

    // The rotated-out token is spent.
    let response = app
        .oneshot(post_json_bearer("/auth/refresh", &refresh, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn introspect_is_reachable_without_authentication() {
    let env = test_env();
    seed_user(&env, Some(Uuid::new_v4()), "analyst@acme.test", &[]);
    let app = router(&env).await;

    let tokens = login(&app, "analyst@acme.test").await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/auth/introspect",
            json!({ "token": tokens["access_token"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["active"], true);

    let response = app
        .oneshot(post_json("/auth/introspect", json!({ "token": "garbage" })))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn health_check_reports_dependencies() {
    let env = test_env();
    let app = router(&env).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "up");
    assert_eq!(body["checks"]["revocation_store"], "up");
}
