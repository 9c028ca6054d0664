//! Airtable API client implementation.

use crate::auth::AuthProvider;
use crate::config::{AirtableConfig, AirtableConfigBuilder, BatchConfig, RetryConfig};
use crate::errors::AirtableResult;
use crate::observability::Metrics;
use crate::resilience::RetryPolicy;
use crate::services::TableService;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::sync::Arc;
use std::time::Duration;

mod orchestrator;
pub use orchestrator::{
    CallOptions, Exchange, Operation, OperationOutput, RequestOrchestrator, TableRef,
};

/// Airtable API client.
///
/// This is the main entry point for interacting with the Airtable API. Every
/// table handle it hands out shares one [`RequestOrchestrator`], so all
/// requests to a base count against the same rate window.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    orchestrator: RequestOrchestrator,
}

impl AirtableClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use integrations_airtable::{AirtableClient, AirtableConfig};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = AirtableConfig::builder()
    ///     .api_key("patXXXXXXXX")
    ///     .build()?;
    ///
    /// let client = AirtableClient::new(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: AirtableConfig) -> AirtableResult<Self> {
        config.validate()?;
        let transport = ReqwestTransport::with_pool(config.connect_timeout, &config.pool)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client on top of a custom transport.
    pub fn with_transport(config: AirtableConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            orchestrator: RequestOrchestrator::new(config, transport),
        }
    }

    /// Creates a client from `AIRTABLE_API_KEY` and `AIRTABLE_BASE_URL`.
    pub fn from_env() -> AirtableResult<Self> {
        Self::new(AirtableConfig::from_env()?)
    }

    /// Creates a new client builder.
    pub fn builder() -> AirtableClientBuilder {
        AirtableClientBuilder::new()
    }

    /// Access a table of a base.
    ///
    /// ```no_run
    /// # use integrations_airtable::*;
    /// # async fn example(client: AirtableClient) -> AirtableResult<()> {
    /// let tasks = client.table("appXXXXXXXX", "Tasks");
    /// for record in tasks.all(ListParams::new().view("Grid view")).await? {
    ///     println!("{}: {:?}", record.id, record.fields.get("Name"));
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn table(&self, base_id: impl Into<String>, table: impl Into<String>) -> TableService {
        TableService::new(self.orchestrator.clone(), TableRef::new(base_id, table))
    }

    /// Gets the request orchestrator (for advanced use cases).
    pub fn orchestrator(&self) -> &RequestOrchestrator {
        &self.orchestrator
    }

    /// Gets the client metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.orchestrator.metrics()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &AirtableConfig {
        self.orchestrator.config()
    }
}

/// Builder for AirtableClient.
pub struct AirtableClientBuilder {
    config_builder: AirtableConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl AirtableClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: AirtableConfig::builder(),
            transport: None,
            retry_policy: None,
        }
    }

    /// Sets the personal access token.
    pub fn api_key(mut self, token: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.api_key(token);
        self
    }

    /// Sets the authentication provider.
    pub fn auth_provider<A: AuthProvider + 'static>(mut self, provider: A) -> Self {
        self.config_builder = self.config_builder.auth_provider(provider);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the per-exchange timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.connect_timeout(timeout);
        self
    }

    /// Sets the user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config_builder = self.config_builder.retry(retry);
        self
    }

    /// Sets the per-base request ceiling.
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.config_builder = self.config_builder.rate_limit(max_requests, window);
        self
    }

    /// Sets the write chunking.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config_builder = self.config_builder.batch(batch);
        self
    }

    /// Uses a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default retry policy.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Builds the client.
    pub fn build(self) -> AirtableResult<AirtableClient> {
        let config = self.config_builder.build()?;
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_pool(
                config.connect_timeout,
                &config.pool,
            )?),
        };

        let orchestrator = match self.retry_policy {
            Some(policy) => RequestOrchestrator::with_policy(config, transport, policy),
            None => RequestOrchestrator::new(config, transport),
        };
        Ok(AirtableClient { orchestrator })
    }
}

impl Default for AirtableClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
