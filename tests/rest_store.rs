use nextup_data::{
    config::Config,
    error::AppError,
    models::{
        forms::SignInRequest,
        query::{Filter, ListQuery},
        user::{AuthRedirect, OAuthProvider, SessionState},
    },
    services::{
        auth::{AuthContext, AuthProvider, GoTrueClient, SessionHandle},
        data::DataService,
        rest::RestStore,
        store::RemoteStore,
    },
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    Config::with_store(&server.uri(), "anon-key")
}

#[tokio::test]
async fn select_sends_postgrest_query_and_reads_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/projects"))
        .and(query_param("select", "*"))
        .and(query_param("skill_tags", "cs.{\"rust\"}"))
        .and(query_param("title", "ilike.%hack%"))
        .and(query_param("order", "created_at.desc,id.desc"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "2"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .and(header("prefer", "count=exact"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "2-3/7")
                .set_body_json(json!([
                    {"id": "p3", "title": "Hackathon team"},
                    {"id": "p4", "title": "Hack night"}
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server)).unwrap();
    let query = ListQuery::new()
        .filter_value("skill_tags", json!(["rust"]), false)
        .search("title", "hack")
        .per_page(2)
        .page(2);
    let rows = store.select("projects", &query).await.unwrap();

    assert_eq!(rows.total, 7);
    assert_eq!(rows.rows.len(), 2);
}

#[tokio::test]
async fn access_token_replaces_anon_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server)).unwrap();
    store.set_access_token(Some("user-jwt".to_string()));
    let rows = store.select("bookmarks", &ListQuery::new()).await.unwrap();
    assert_eq!(rows.total, 0);
}

#[tokio::test]
async fn unique_violation_maps_to_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/bookmarks"))
        .and(header("prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"bookmarks_unique\"",
            "details": null,
            "hint": null
        })))
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server)).unwrap();
    let err = store
        .insert("bookmarks", json!({"user_id": "u1", "item_id": "p1", "item_type": "project"}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn rejected_shape_surfaces_verbatim_as_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/projects"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "23502",
            "message": "null value in column \"title\" violates not-null constraint"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(RestStore::new(&config_for(&server)).unwrap());
    let data = DataService::new(
        config_for(&server),
        Some(store as Arc<dyn RemoteStore>),
        SessionHandle::signed_in("u1"),
    );
    let err = data.create("projects", json!({"description": "x"})).await.unwrap_err();
    match err {
        AppError::Validation(message) => assert!(message.contains("not-null constraint")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_are_data_unavailable_for_lists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let store = Arc::new(RestStore::new(&config_for(&server)).unwrap());
    let data = DataService::new(
        config_for(&server),
        Some(store as Arc<dyn RemoteStore>),
        SessionHandle::anonymous(),
    );
    let err = data.list("events", &ListQuery::new()).await.unwrap_err();
    assert!(matches!(err, AppError::DataUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn update_patches_matching_rows() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("id", "eq.n1"))
        .and(query_param("user_id", "eq.u1"))
        .and(body_json(json!({"is_read": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "n1", "user_id": "u1", "is_read": true}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server)).unwrap();
    let updated = store
        .update(
            "notifications",
            &[Filter::eq("id", "n1"), Filter::eq("user_id", "u1")],
            json!({"is_read": true}),
        )
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
}

#[tokio::test]
async fn password_sign_in_establishes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", "anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {"id": "u1", "email": "student@uni.edu"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u1"))
        .and(header("authorization", "Bearer jwt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store: Arc<dyn RemoteStore> = Arc::new(RestStore::new(&config).unwrap());
    let provider: Arc<dyn AuthProvider> = Arc::new(GoTrueClient::new(&config).unwrap());
    let auth = AuthContext::new(config, Some(provider), Some(store), SessionHandle::anonymous());

    let redirect = auth
        .sign_in_with_password(&SignInRequest {
            email: "student@uni.edu".to_string(),
            password: "hunter22".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(redirect, AuthRedirect::ProfileSetup);
    assert!(matches!(auth.session_state(), SessionState::Authenticated(_)));
    assert_eq!(auth.current_user().map(|u| u.id), Some("u1".to_string()));
}

#[tokio::test]
async fn bad_credentials_are_authentication_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(&config_for(&server)).unwrap();
    let err = client
        .sign_in_with_password("student@uni.edu", "wrong-pass")
        .await
        .unwrap_err();
    match err {
        AppError::Authentication(message) => assert_eq!(message, "Invalid login credentials"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn sign_up_without_token_waits_for_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u9",
            "email": "new@uni.edu",
            "confirmation_sent_at": "2024-03-01T10:00:00Z"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(&config_for(&server)).unwrap();
    let session = client.sign_up("new@uni.edu", "longpassword", None).await.unwrap();
    assert!(session.is_none());
}

#[test]
fn authorize_url_names_provider() {
    let config = Config::with_store("https://demo.supabase.co", "anon-key");
    let client = GoTrueClient::new(&config).unwrap();
    let url = client
        .authorize_url(OAuthProvider::Github, Some("https://nextup.app/dashboard"))
        .unwrap();
    assert_eq!(url.path(), "/auth/v1/authorize");
    assert!(url.query().unwrap_or_default().contains("provider=github"));
}
