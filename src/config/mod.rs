//! Configuration types for the runtime.
//!
//! Everything that used to be read ad hoc from the process environment (base
//! URL, installation id, worker count) is collected here once at startup and
//! passed by reference to the client, the credential resolver and the
//! supervisor.

use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use secrecy::SecretString;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default GitHub API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "integrations-github-runtime/0.1.0";

/// Environment variable overriding the API base URL.
pub const ENV_BASE_URL: &str = "GITHUB_API_BASE_URL";
/// Environment variable holding the organisation installation id.
pub const ENV_INSTALLATION_ID: &str = "GITHUB_ORG_INSTALLATION_ID";
/// Environment variable holding the GitHub App id.
pub const ENV_APP_ID: &str = "GITHUB_APP_ID";
/// Environment variable holding the GitHub App private key (PEM).
pub const ENV_PRIVATE_KEY: &str = "GITHUB_PRIVATE_KEY";
/// Environment variable selecting the deployment mode.
pub const ENV_RUNTIME_ENV: &str = "RUNTIME_ENV";
/// Environment variable overriding the worker count in production.
pub const ENV_WEB_CONCURRENCY: &str = "WEB_CONCURRENCY";

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// GitHub App credentials used to mint installation tokens.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    /// GitHub App ID.
    pub app_id: u64,
    /// Private key (PEM format).
    pub private_key: SecretString,
}

impl AppCredentials {
    /// Creates app credentials.
    pub fn new(app_id: u64, private_key: impl Into<String>) -> Self {
        Self {
            app_id,
            private_key: SecretString::new(private_key.into()),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// API base URL.
    pub base_url: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Organisation-wide installation id for token fallback.
    pub installation_id: Option<u64>,
    /// App credentials for the token exchange.
    pub app: Option<AppCredentials>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Production mode.
    pub production: bool,
    /// Explicit worker count used in production mode.
    pub web_concurrency: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            installation_id: None,
            app: None,
            retry: RetryConfig::default(),
            production: false,
            web_concurrency: None,
        }
    }
}

impl RuntimeConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> RuntimeResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Reads the configuration from an explicit variable map.
    pub fn from_env_map(vars: &HashMap<String, String>) -> RuntimeResult<Self> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let mut builder = Self::builder();

        if let Some(url) = get(ENV_BASE_URL) {
            builder = builder.base_url(url);
        }

        if let Some(raw) = get(ENV_INSTALLATION_ID) {
            builder = builder.installation_id(parse_u64(ENV_INSTALLATION_ID, raw)?);
        }

        match (get(ENV_APP_ID), get(ENV_PRIVATE_KEY)) {
            (Some(id), Some(key)) => {
                builder = builder.app(AppCredentials::new(parse_u64(ENV_APP_ID, id)?, key));
            }
            (None, None) => {}
            _ => {
                return Err(RuntimeError::new(
                    ErrorKind::InvalidAppCredentials,
                    format!("{} and {} must be set together", ENV_APP_ID, ENV_PRIVATE_KEY),
                ))
            }
        }

        if get(ENV_RUNTIME_ENV) == Some("production") {
            builder = builder.production(true);
        }

        // Unparseable or zero values fall back to the CPU count.
        if let Some(workers) = get(ENV_WEB_CONCURRENCY).and_then(|v| v.parse::<usize>().ok()) {
            builder = builder.web_concurrency(workers);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RuntimeResult<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            RuntimeError::new(
                ErrorKind::InvalidBaseUrl,
                format!("Base URL {:?} is not a valid URL: {}", self.base_url, e),
            )
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RuntimeError::new(
                ErrorKind::InvalidBaseUrl,
                "Base URL must start with http:// or https://",
            ));
        }

        if self.user_agent.is_empty() {
            return Err(RuntimeError::configuration("User-Agent is required by GitHub API"));
        }

        Ok(())
    }

    /// Number of worker processes the supervisor keeps alive.
    pub fn worker_count(&self) -> usize {
        if !self.production {
            return 1;
        }
        self.web_concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
    }
}

fn parse_u64(name: &str, raw: &str) -> RuntimeResult<u64> {
    raw.parse().map_err(|_| {
        RuntimeError::configuration(format!("{} must be a positive integer, got {:?}", name, raw))
    })
}

/// Builder for RuntimeConfig.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    base_url: Option<String>,
    user_agent: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    installation_id: Option<u64>,
    app: Option<AppCredentials>,
    retry: Option<RetryConfig>,
    production: bool,
    web_concurrency: Option<usize>,
}

impl RuntimeConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the organisation installation id.
    pub fn installation_id(mut self, id: u64) -> Self {
        self.installation_id = Some(id);
        self
    }

    /// Sets the GitHub App credentials.
    pub fn app(mut self, app: AppCredentials) -> Self {
        self.app = Some(app);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Enables or disables production mode.
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Sets the production worker count override.
    pub fn web_concurrency(mut self, workers: usize) -> Self {
        self.web_concurrency = Some(workers);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> RuntimeResult<RuntimeConfig> {
        let config = RuntimeConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            installation_id: self.installation_id,
            app: self.app,
            retry: self.retry.unwrap_or_default(),
            production: self.production,
            web_concurrency: self.web_concurrency,
        };

        config.validate()?;
        Ok(config)
    }
}
