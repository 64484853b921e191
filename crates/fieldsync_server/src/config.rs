//! Service configuration.

use fieldsync_engine::EngineConfig;
use std::time::Duration;

/// Configuration for the sync service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of changes accepted in one push batch. A larger
    /// batch is the one whole-request rejection the push path has.
    pub max_push_batch: usize,
    /// Maximum number of decisions accepted in one resolve batch.
    pub max_resolve_batch: usize,
    /// Whether device tokens are required.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token expiration duration.
    pub token_expiry: Duration,
    /// Processor tunables.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            max_push_batch: 100,
            max_resolve_batch: 100,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            engine: EngineConfig::default(),
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum resolve batch size.
    pub fn with_max_resolve_batch(mut self, size: usize) -> Self {
        self.max_resolve_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token expiration duration.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Sets the processor tunables.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
