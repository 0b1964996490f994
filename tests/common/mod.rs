//! Shared helpers for integration tests.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use integrations_github_runtime::mocks::MockTokenIssuer;
use integrations_github_runtime::resilience::NoBackoff;
use integrations_github_runtime::{ApiClient, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use wiremock::{MockServer, ResponseTemplate};

/// Builds a client against the mock server with no retry delay.
pub fn client_for(server: &MockServer, installation_id: Option<u64>, issuer: Arc<MockTokenIssuer>) -> ApiClient {
    let mut builder = RuntimeConfig::builder().base_url(server.uri());
    if let Some(id) = installation_id {
        builder = builder.installation_id(id);
    }
    let config = builder.build().expect("valid test config");

    ApiClient::builder(&config)
        .backoff(Arc::new(NoBackoff))
        .token_issuer(issuer)
        .build()
        .expect("client builds")
}

/// A client with no installation id and an issuer that is never expected to run.
pub fn anonymous_client(server: &MockServer) -> ApiClient {
    client_for(server, None, Arc::new(MockTokenIssuer::new("unused")))
}

/// Contents API payload the way GitHub returns it, base64 wrapped at 60 columns.
pub fn contents_response(text: &str) -> ResponseTemplate {
    let encoded = STANDARD.encode(text);
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();

    ResponseTemplate::new(200).set_body_json(json!({
        "type": "file",
        "encoding": "base64",
        "content": wrapped.join("\n") + "\n",
    }))
}

/// GitHub-style error body.
pub fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "message": message,
        "documentation_url": "https://docs.github.com/rest"
    }))
}

/// Number of requests the server has seen.
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}
