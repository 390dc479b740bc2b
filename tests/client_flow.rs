//! Integration tests for login, token caching and 401 handling, with both
//! the Azure AD token endpoint and the management API served by wiremock.

use apim_provision::auth::{ClientSecretAuth, TokenCache, MANAGEMENT_SCOPE};
use apim_provision::client::ApimClient;
use apim_provision::error::ApimError;
use apim_provision::users::get_user;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

/// Helper: a client whose token cache logs in against the mock server.
fn client_with_login(server: &MockServer) -> ApimClient {
    let auth = ClientSecretAuth::new("tenant-1", "client-1", "secret-1", MANAGEMENT_SCOPE)
        .with_login_url(&format!("{}/", server.uri()));
    ApimClient::with_base_url(TokenCache::new(auth), &format!("{}/", server.uri())).unwrap()
}

fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "ext_expires_in": 3599,
        "access_token": token
    }))
}

fn user_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "/users/u-1",
        "name": "u-1",
        "properties": {"email": "ada@contoso.com"}
    }))
}

#[tokio::test]
async fn token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;
    let client = client_with_login(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(token_response("tok-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u-1"))
        .and(header("authorization", "Bearer tok-1"))
        .and(query_param("api-version", "2022-08-01"))
        .respond_with(user_response())
        .expect(2)
        .mount(&server)
        .await;

    assert!(get_user(&client, "u-1").await.unwrap().is_some());
    assert!(get_user(&client, "u-1").await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_request_retried_once() {
    let server = MockServer::start().await;
    let client = client_with_login(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u-1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u-1"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(user_response())
        .expect(1)
        .mount(&server)
        .await;

    let user = get_user(&client, "u-1").await.unwrap().unwrap();
    assert_eq!(user.name, "u-1");
}

#[tokio::test]
async fn second_401_is_returned_as_api_error() {
    let server = MockServer::start().await;
    let client = client_with_login(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
        .expect(2)
        .mount(&server)
        .await;

    let err = get_user(&client, "u-1").await.unwrap_err();
    match err {
        ApimError::Api { status, body } => {
            assert_eq!(status.as_u16(), 401);
            assert!(body.contains("InvalidAuthenticationToken"));
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

#[tokio::test]
async fn login_failure_surfaces_aadsts_body() {
    let server = MockServer::start().await;
    let client = client_with_login(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret provided."}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(user_response())
        .expect(0)
        .mount(&server)
        .await;

    let err = get_user(&client, "u-1").await.unwrap_err();
    assert!(matches!(err, ApimError::Auth { .. }));
    assert!(err.to_string().contains("AADSTS7000215"));
}

#[tokio::test]
async fn malformed_token_response_is_an_auth_error() {
    let server = MockServer::start().await;
    let client = client_with_login(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = get_user(&client, "u-1").await.unwrap_err();
    assert!(matches!(err, ApimError::Auth { .. }));
}

#[tokio::test]
async fn malformed_api_response_is_a_parse_error() {
    let server = MockServer::start().await;
    let client =
        ApimClient::with_base_url(TokenCache::with_token("t"), &format!("{}/", server.uri()))
            .unwrap();

    Mock::given(method("GET"))
        .and(path("/users/u-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = get_user(&client, "u-1").await.unwrap_err();
    assert!(matches!(err, ApimError::Parse(_)));
}
