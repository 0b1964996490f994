//! Installation token acquisition for callers that hold no token.

use crate::config::{AppCredentials, RuntimeConfig, ENV_APP_ID, ENV_INSTALLATION_ID, ENV_PRIVATE_KEY};
use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Exchanges an installation id for a short-lived access token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issues a new installation access token.
    async fn issue_token(&self, installation_id: u64) -> RuntimeResult<SecretString>;
}

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    /// Issued at (Unix timestamp).
    iat: i64,
    /// Expiration (Unix timestamp).
    exp: i64,
    /// Issuer (App ID).
    iss: String,
}

/// Installation token response.
#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    #[allow(dead_code)]
    expires_at: Option<DateTime<Utc>>,
}

/// Issues installation tokens by signing a GitHub App JWT.
pub struct AppTokenIssuer {
    http: Client,
    base_url: String,
    user_agent: String,
    credentials: AppCredentials,
}

impl AppTokenIssuer {
    /// Creates an issuer that talks to the configured API base URL.
    pub fn new(config: &RuntimeConfig, credentials: AppCredentials) -> RuntimeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                RuntimeError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            credentials,
        })
    }

    /// Generates a JWT for GitHub App authentication.
    fn generate_jwt(&self) -> RuntimeResult<String> {
        let now = Utc::now();
        // Issued 60 seconds in the past to tolerate clock drift; GitHub caps expiry at 10 minutes.
        let claims = JwtClaims {
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::minutes(9)).timestamp(),
            iss: self.credentials.app_id.to_string(),
        };

        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.expose_secret().as_bytes())
            .map_err(|e| {
                RuntimeError::new(
                    ErrorKind::InvalidAppCredentials,
                    format!("Failed to parse private key: {}", e),
                )
            })?;

        encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
            RuntimeError::new(
                ErrorKind::InvalidAppCredentials,
                format!("Failed to generate JWT: {}", e),
            )
        })
    }
}

#[async_trait]
impl TokenIssuer for AppTokenIssuer {
    async fn issue_token(&self, installation_id: u64) -> RuntimeResult<SecretString> {
        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, installation_id
        );

        tracing::debug!(installation_id, "Requesting installation access token");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", jwt))
            .header(ACCEPT, crate::client::PREVIEW_ACCEPT)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| RuntimeError::from_transport(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::new(
                ErrorKind::TokenIssuanceFailed,
                format!("Installation {} token exchange was rejected", installation_id),
            )
            .with_status(status.as_u16())
            .with_url(url));
        }

        let body: InstallationTokenResponse = response.json().await.map_err(|e| {
            RuntimeError::deserialization(format!("Failed to parse installation token: {}", e))
                .with_url(url.clone())
        })?;

        Ok(SecretString::new(body.token))
    }
}

/// Issuer used when no app credentials are configured.
#[derive(Debug, Default)]
pub struct UnconfiguredIssuer;

#[async_trait]
impl TokenIssuer for UnconfiguredIssuer {
    async fn issue_token(&self, _installation_id: u64) -> RuntimeResult<SecretString> {
        Err(RuntimeError::new(
            ErrorKind::InvalidAppCredentials,
            format!(
                "Cannot exchange an installation id for a token without app credentials. Set {} and {}.",
                ENV_APP_ID, ENV_PRIVATE_KEY
            ),
        ))
    }
}

/// Resolves a fallback token from the organisation installation id.
#[derive(Clone)]
pub struct CredentialResolver {
    installation_id: Option<u64>,
    issuer: Arc<dyn TokenIssuer>,
}

impl CredentialResolver {
    /// Creates a resolver.
    pub fn new(installation_id: Option<u64>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            installation_id,
            issuer,
        }
    }

    /// Creates a resolver from configuration, using the app issuer when credentials exist.
    pub fn from_config(config: &RuntimeConfig) -> RuntimeResult<Self> {
        let issuer: Arc<dyn TokenIssuer> = match &config.app {
            Some(app) => Arc::new(AppTokenIssuer::new(config, app.clone())?),
            None => Arc::new(UnconfiguredIssuer),
        };
        Ok(Self::new(config.installation_id, issuer))
    }

    /// Returns the installation id, or the configuration error explaining how to set it.
    pub fn require_installation_id(&self) -> RuntimeResult<u64> {
        self.installation_id.ok_or_else(missing_installation_id)
    }

    /// Exchanges the installation id for a fresh access token.
    ///
    /// Tokens are not cached; every call performs its own exchange. Issuer
    /// failures are returned as-is and never retried.
    pub async fn fallback_token(&self) -> RuntimeResult<SecretString> {
        let installation_id = self.require_installation_id()?;
        self.issuer.issue_token(installation_id).await
    }
}

fn missing_installation_id() -> RuntimeError {
    let msg = "A settings file in a private repository can only be read with an installation id for your GitHub App.";
    let subtitle = "You can find it in the `installation` webhook event sent when the app was installed into your organisation.";
    let action = format!("Set it as \"{}\" in your environment.", ENV_INSTALLATION_ID);
    RuntimeError::new(
        ErrorKind::MissingInstallationId,
        [msg, subtitle, action.as_str()].join(" "),
    )
}
