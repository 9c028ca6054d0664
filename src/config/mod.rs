//! Configuration for the Airtable client.

use crate::auth::{ApiKeyProvider, AuthProvider};
use crate::errors::{AirtableError, AirtableResult, ConfigurationError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.airtable.com/v0";

/// Maximum number of records per create/update/delete request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Maximum number of requests per base within [`RATE_WINDOW`].
pub const MAX_REQUESTS_PER_WINDOW: u32 = 5;

/// Rolling window for the per-base request ceiling.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Maximum number of exchanges per logical request, first attempt included.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Backoff before the second attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Largest page size the list endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// List URLs longer than this are sent as `POST .../listRecords` instead.
pub const MAX_URL_LENGTH: usize = 16_000;

/// Environment variable holding the personal access token.
pub const API_KEY_ENV: &str = "AIRTABLE_API_KEY";

/// Environment variable overriding [`DEFAULT_BASE_URL`].
pub const BASE_URL_ENV: &str = "AIRTABLE_BASE_URL";

/// Retry configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of exchanges, first attempt included.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add jitter to backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Per-base request ceiling.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    pub max_requests: u32,
    /// Length of the rolling window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: MAX_REQUESTS_PER_WINDOW,
            window: RATE_WINDOW,
        }
    }
}

/// Chunking of multi-record writes.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Records per request, at most [`MAX_BATCH_SIZE`].
    pub max_batch_size: usize,
    /// Chunks of one operation in flight at the same time.
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            max_concurrency: MAX_REQUESTS_PER_WINDOW as usize,
        }
    }
}

/// Connection pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,

    /// Idle timeout.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

/// Configuration for the Airtable client.
#[derive(Clone)]
pub struct AirtableConfig {
    /// Authentication provider.
    pub auth_provider: Arc<dyn AuthProvider>,

    /// Base URL for the API.
    pub base_url: Url,

    /// Deadline for a single exchange.
    pub timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Retry behaviour.
    pub retry: RetryConfig,

    /// Per-base request ceiling.
    pub rate_limit: RateLimitConfig,

    /// Write chunking.
    pub batch: BatchConfig,

    /// Pool configuration.
    pub pool: PoolConfig,
}

impl fmt::Debug for AirtableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtableConfig")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("batch", &self.batch)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl AirtableConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> AirtableConfigBuilder {
        AirtableConfigBuilder::new()
    }

    /// Creates configuration from `AIRTABLE_API_KEY` and, optionally,
    /// `AIRTABLE_BASE_URL`.
    pub fn from_env() -> AirtableResult<Self> {
        let token = std::env::var(API_KEY_ENV).map_err(|_| {
            AirtableError::Configuration(ConfigurationError::MissingCredentials(format!(
                "{} is not set",
                API_KEY_ENV
            )))
        })?;

        let mut builder = AirtableConfigBuilder::new().api_key(token);

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            builder = builder.base_url(url);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AirtableResult<()> {
        match self.base_url.scheme() {
            "https" | "http" => {}
            other => {
                return Err(AirtableError::configuration(format!(
                    "Base URL must use HTTP(S), got {}",
                    other
                )))
            }
        }

        if self.batch.max_batch_size == 0 || self.batch.max_batch_size > MAX_BATCH_SIZE {
            return Err(AirtableError::configuration(format!(
                "Batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.batch.max_concurrency == 0 {
            return Err(AirtableError::configuration(
                "Batch concurrency must be at least 1",
            ));
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window.is_zero() {
            return Err(AirtableError::configuration(
                "Rate limit needs a positive request count and window",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AirtableError::configuration(
                "Retry policy needs at least one attempt",
            ));
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(AirtableError::configuration(format!(
                "Backoff multiplier must be a finite number of at least 1, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(AirtableError::configuration(
                "Maximum backoff must not be shorter than the initial backoff",
            ));
        }

        if self.timeout.is_zero() {
            return Err(AirtableError::configuration("Timeout must be positive"));
        }

        Ok(())
    }
}

/// Builder for AirtableConfig.
pub struct AirtableConfigBuilder {
    auth_provider: Option<Arc<dyn AuthProvider>>,
    base_url: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: Option<String>,
    retry: RetryConfig,
    rate_limit: RateLimitConfig,
    batch: BatchConfig,
    pool: PoolConfig,
}

impl AirtableConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            auth_provider: None,
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            batch: BatchConfig::default(),
            pool: PoolConfig::default(),
        }
    }

    /// Authenticates with a personal access token.
    pub fn api_key(self, token: impl Into<String>) -> Self {
        self.auth_provider(ApiKeyProvider::new(token))
    }

    /// Sets the authentication provider.
    pub fn auth_provider<A: AuthProvider + 'static>(mut self, provider: A) -> Self {
        self.auth_provider = Some(Arc::new(provider));
        self
    }

    /// Sets the authentication provider from an Arc.
    pub fn auth_provider_arc(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-exchange timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the user agent string.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum number of exchanges per request.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Sets the per-base request ceiling.
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit = RateLimitConfig {
            max_requests,
            window,
        };
        self
    }

    /// Sets the batch configuration.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Sets the pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> AirtableResult<AirtableConfig> {
        let auth_provider = self.auth_provider.ok_or_else(|| {
            AirtableError::Configuration(ConfigurationError::MissingCredentials(
                "Authentication provider is required".to_string(),
            ))
        })?;

        let raw_url = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let base_url = Url::parse(raw_url.trim_end_matches('/')).map_err(|e| {
            AirtableError::configuration(format!("Invalid base URL {:?}: {}", raw_url, e))
        })?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("integrations-airtable/{}", env!("CARGO_PKG_VERSION")));

        let config = AirtableConfig {
            auth_provider,
            base_url,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            user_agent,
            retry: self.retry,
            rate_limit: self.rate_limit,
            batch: self.batch,
            pool: self.pool,
        };

        config.validate()?;

        Ok(config)
    }
}

impl Default for AirtableConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
