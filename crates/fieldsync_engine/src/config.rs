//! Engine configuration.

use std::time::Duration;

/// Tunables for the push, pull and resolve processors.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default pull page size when the client does not supply one.
    pub default_page_size: usize,
    /// Hard cap on the pull page size.
    pub max_page_size: usize,
    /// Bound on each per-item adapter call. A timed-out item is reported as
    /// a per-item failure, never a batch abort.
    pub item_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 500,
            item_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the default pull page size.
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the maximum pull page size.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    /// Sets the per-item adapter call bound.
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
