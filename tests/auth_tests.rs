//! Installation token exchange against a mock GitHub API.

mod common;

use common::{contents_response, error_response, request_count};
use integrations_github_runtime::client::PREVIEW_ACCEPT;
use integrations_github_runtime::{
    AppCredentials, AppTokenIssuer, ApiClient, ErrorKind, RuntimeConfig, TokenIssuer,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use test_case::test_case;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PRIVATE_KEY: &str = include_str!("fixtures/app_private_key.pem");
const PUBLIC_KEY: &str = include_str!("fixtures/app_public_key.pem");
const APP_ID: u64 = 4242;

#[derive(Debug, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

fn app_config(server: &MockServer) -> RuntimeConfig {
    RuntimeConfig::builder()
        .base_url(server.uri())
        .installation_id(77)
        .app(AppCredentials::new(APP_ID, PRIVATE_KEY))
        .build()
        .expect("valid test config")
}

fn issuer_for(server: &MockServer) -> AppTokenIssuer {
    AppTokenIssuer::new(&app_config(server), AppCredentials::new(APP_ID, PRIVATE_KEY))
        .expect("issuer builds")
}

fn token_created() -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "token": "ghs_installation",
        "expires_at": "2030-01-01T00:00:00Z"
    }))
}

fn bearer_jwt(request: &Request) -> String {
    let value = request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .expect("authorization header");
    value
        .strip_prefix("Bearer ")
        .expect("bearer scheme")
        .to_string()
}

#[tokio::test]
async fn test_exchange_posts_signed_app_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/77/access_tokens"))
        .and(header("accept", PREVIEW_ACCEPT))
        .respond_with(token_created())
        .expect(1)
        .mount(&server)
        .await;

    let token = issuer_for(&server).issue_token(77).await.unwrap();
    assert_eq!(token.expose_secret(), "ghs_installation");

    let requests = server.received_requests().await.unwrap();
    let jwt = bearer_jwt(&requests[0]);
    let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
    let claims = decode::<Claims>(&jwt, &key, &Validation::new(Algorithm::RS256))
        .unwrap()
        .claims;

    assert_eq!(claims.iss, APP_ID.to_string());
    assert!(claims.exp - claims.iat <= 600);
}

#[test_case(401 ; "bad jwt")]
#[test_case(403 ; "forbidden")]
#[test_case(404 ; "unknown installation")]
#[test_case(500 ; "server error")]
#[tokio::test]
async fn test_rejected_exchange_is_not_retried(status: u16) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/77/access_tokens"))
        .respond_with(error_response(status, "Rejected"))
        .expect(1)
        .mount(&server)
        .await;

    let err = issuer_for(&server).issue_token(77).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TokenIssuanceFailed);
    assert_eq!(err.status_code(), Some(status));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_malformed_token_response_is_a_deserialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"expires_at": null})))
        .mount(&server)
        .await;

    let err = issuer_for(&server).issue_token(77).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeserializationError);
}

#[tokio::test]
async fn test_private_read_exchanges_configured_app_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/77/access_tokens"))
        .respond_with(token_created())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/private/contents/settings.json"))
        .and(header("authorization", "token ghs_installation"))
        .respond_with(contents_response("private settings"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(error_response(404, "Not Found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&app_config(&server)).unwrap();
    let text = client
        .contents()
        .get_file_contents_without_token("org/private", "settings.json")
        .await
        .unwrap();

    assert_eq!(text, "private settings");
}
