//! Client configuration and the per-model rate limiter registry.

use crate::error::Error;
use crate::model::ChatModel;
use crate::rate_limit::{Clock, RateLimiter, SystemClock, DEFAULT_WINDOW};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::tables::ModelTables;
use crate::tokens::TokenEstimator;
use crate::transport::{Endpoint, RequestTransport, DEFAULT_BASE_URL};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TASKS: &[&str] = &["chat_completion"];

/// Entry point: holds the credential and hands out model clients.
///
/// Model clients created for the same model name share one rate limiter, so
/// their admissions and usage count against a single budget.
#[derive(Clone)]
pub struct Client {
    api_key: Arc<str>,
    config: ClientConfig,
    tables: Arc<ModelTables>,
    estimator: Arc<TokenEstimator>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    limiters: Arc<Mutex<HashMap<String, Arc<RateLimiter>>>>,
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API root URL.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry policy applied to every call.
    pub retry: RetryPolicy,
    /// Rolling rate limit window.
    pub rate_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            rate_window: DEFAULT_WINDOW,
        }
    }
}

/// Builder for Client.
pub struct ClientBuilder {
    api_key: Option<String>,
    config: ClientConfig,
    tables: Option<ModelTables>,
    estimator: Option<TokenEstimator>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            api_key: None,
            config: ClientConfig::default(),
            tables: None,
            estimator: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Load the API key from `PERPLEXITY_API_KEY`, if set.
    pub fn from_env(mut self) -> Self {
        if let Ok(key) = env::var("PERPLEXITY_API_KEY") {
            self.api_key = Some(key);
        }
        self
    }

    /// Set a custom base URL (useful for testing with mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set maximum attempts per call, counting the first one.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_attempts = retries.max(1);
        self
    }

    /// Set initial retry backoff.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.initial_backoff = backoff;
        self
    }

    /// Set maximum retry backoff.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.max_backoff = backoff;
        self
    }

    /// Randomize backoff delays.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.config.retry.jitter = jitter;
        self
    }

    /// Set the rolling rate limit window.
    pub fn rate_window(mut self, window: Duration) -> Self {
        self.config.rate_window = window;
        self
    }

    /// Replace the built-in price and output length tables.
    pub fn tables(mut self, tables: ModelTables) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Replace the default token estimator.
    pub fn token_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Replace the timer used between retries.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the clock used by rate limiters.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, Error> {
        let api_key = self
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or(Error::MissingApiKey)?;

        let tables = match self.tables {
            Some(tables) => tables,
            None => ModelTables::builtin()?,
        };

        Ok(Client {
            api_key: api_key.into(),
            config: self.config,
            tables: Arc::new(tables),
            estimator: Arc::new(self.estimator.unwrap_or_default()),
            sleeper: self.sleeper,
            clock: self.clock,
            limiters: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        ClientBuilder::new().from_env().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Names of the supported tasks.
    pub fn list_tasks() -> &'static [&'static str] {
        TASKS
    }

    /// Create a chat completion client for `model`.
    ///
    /// The first call for a model name creates its limiter. Later calls reuse
    /// it and replace only the limits they supply.
    pub fn create_chat_completion(
        &self,
        model: impl Into<String>,
        limit_tokens: Option<u64>,
        limit_requests: Option<u32>,
    ) -> ChatModel {
        let model = model.into();
        let rate_limiter = self.rate_limiter(&model, limit_tokens, limit_requests);

        let transport = RequestTransport::new(&*self.api_key, Endpoint::chat_completions())
            .with_base_url(self.config.base_url.as_str())
            .with_timeout(self.config.timeout);

        ChatModel::new(model, transport, rate_limiter)
            .with_estimator(Arc::clone(&self.estimator))
            .with_tables(Arc::clone(&self.tables))
            .with_retry(self.config.retry)
            .with_sleeper(Arc::clone(&self.sleeper))
    }

    fn rate_limiter(
        &self,
        model: &str,
        limit_tokens: Option<u64>,
        limit_requests: Option<u32>,
    ) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        if let Some(existing) = limiters.get(model) {
            existing.set_limits(limit_requests, limit_tokens);
            return Arc::clone(existing);
        }

        debug!(model, ?limit_tokens, ?limit_requests, "creating rate limiter");
        let limiter = Arc::new(RateLimiter::with_clock(
            limit_requests,
            limit_tokens,
            self.config.rate_window,
            Arc::clone(&self.clock),
        ));
        limiters.insert(model.to_string(), Arc::clone(&limiter));
        limiter
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("models", &self.limiters.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::builder()
            .api_key("test-key")
            .token_estimator(TokenEstimator::heuristic())
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_builder() {
        let client = Client::builder()
            .api_key("test-key")
            .base_url("http://localhost:1234/")
            .timeout(Duration::from_secs(60))
            .max_retries(5)
            .retry_backoff(Duration::from_millis(10))
            .rate_window(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(client.config().retry.max_attempts, 5);
        assert_eq!(
            client.config().retry.initial_backoff,
            Duration::from_millis(10)
        );
        assert_eq!(client.config().rate_window, Duration::from_secs(30));
        assert_eq!(&*client.api_key, "test-key");

        let model = client.create_chat_completion("m1", None, None);
        assert_eq!(
            model.transport().url(),
            "http://localhost:1234/chat/completions"
        );
        assert_eq!(model.rate_limiter().window(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            Client::builder().build(),
            Err(Error::MissingApiKey)
        ));
        assert!(matches!(
            Client::builder().api_key("").build(),
            Err(Error::MissingApiKey)
        ));
    }

    #[test]
    fn test_list_tasks() {
        assert_eq!(Client::list_tasks(), &["chat_completion"]);
    }

    #[test]
    fn test_same_model_shares_limiter() {
        let client = client();
        let a = client.create_chat_completion("m1", Some(1000), Some(10));
        let b = client.create_chat_completion("m1", None, Some(5));
        let c = client.create_chat_completion("m2", None, None);

        assert!(Arc::ptr_eq(a.rate_limiter(), b.rate_limiter()));
        assert!(!Arc::ptr_eq(a.rate_limiter(), c.rate_limiter()));

        let state = a.rate_limiter().snapshot();
        assert_eq!(state.limit_requests, Some(5));
        assert_eq!(state.limit_tokens, Some(1000));
        assert_eq!(c.rate_limiter().snapshot().limit_tokens, None);
    }

    #[test]
    fn test_zero_limits_mean_unlimited() {
        let client = client();
        let model = client.create_chat_completion("m1", Some(0), Some(0));
        let state = model.rate_limiter().snapshot();
        assert_eq!(state.limit_tokens, None);
        assert_eq!(state.limit_requests, None);
        assert!(model.verify_invoke_viability(1_000_000, 1));
    }

    #[test]
    fn test_shared_budget_across_clients() {
        let client = client();
        let a = client.create_chat_completion("m1", None, Some(1));
        let b = client.create_chat_completion("m1", None, None);

        a.rate_limiter().update(None, Some(10));
        assert!(!b.verify_invoke_viability(1, 1));
    }

    #[test]
    fn test_debug_hides_key() {
        let client = client();
        assert!(!format!("{client:?}").contains("test-key"));
    }
}
