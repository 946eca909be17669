//! Configuration types for the proxy and the pool
//!
//! Level 4 - Utilities and configuration

use std::time::Duration;

use arena_core::EngineConfig;

/// Deadline for a single proxy request, measured from send time
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for workers to report ready
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-task proxy configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Engine configuration sent with the init message
    pub engine: EngineConfig,
    /// Hard deadline per request; should exceed the engine's time limit
    pub request_timeout: Duration,
    /// How long to wait for the worker to become ready
    pub init_timeout: Duration,
    /// Run the engine on a worker thread (false = inline from the start)
    pub use_workers: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            use_workers: true,
        }
    }
}

impl ProxyConfig {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn inline(mut self) -> Self {
        self.use_workers = false;
        self
    }
}

/// Worker pool configuration
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker units
    pub size: usize,
    /// Engine configuration shared by every worker
    pub engine: EngineConfig,
    /// How long to wait for all workers to become ready
    pub init_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            engine: EngineConfig::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new(size: usize, engine: EngineConfig) -> Self {
        Self {
            size,
            engine,
            ..Default::default()
        }
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

/// One worker per available core
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_config_defaults() {
        let config = ProxyConfig::default();
        assert!(config.use_workers);
        assert!(config.request_timeout > config.engine.time_limit);
        assert!(!config.inline().use_workers);
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert!(config.size >= 1);
        assert_eq!(config.init_timeout, DEFAULT_INIT_TIMEOUT);

        let config = PoolConfig::new(3, EngineConfig::default());
        assert_eq!(config.size, 3);
    }
}
