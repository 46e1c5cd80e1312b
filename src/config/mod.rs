//! Broker configuration
//!
//! Every size ceiling, TTL and timeout the broker enforces lives here so a
//! deployment can tune them without recompiling. Loaded by [`ConfigLoader`]
//! from defaults, config files and `ACB__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;
pub mod storage;

pub use facade::ConfigLoader;
pub use storage::StorageConfig;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 1 MiB
pub const DEFAULT_MAX_INLINE_PAYLOAD: u64 = 1024 * 1024;
/// 100 MiB
pub const DEFAULT_MAX_STREAM_PAYLOAD: u64 = 100 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CONTEXT_TTL_SECS: u64 = 86_400;
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;
pub const DEFAULT_TENANT: &str = "default";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Reject combinations the engines cannot operate with.
    pub fn validate(&self) -> Result<(), ApiError> {
        let limits = &self.limits;
        if limits.chunk_size == 0 {
            return Err(ApiError::ConfigError("limits.chunk_size must be positive".to_string()));
        }
        if limits.chunk_size as u64 > limits.max_inline_payload {
            return Err(ApiError::ConfigError(format!(
                "limits.chunk_size {} exceeds limits.max_inline_payload {}",
                limits.chunk_size, limits.max_inline_payload
            )));
        }
        if limits.max_stream_payload < limits.max_inline_payload {
            return Err(ApiError::ConfigError(
                "limits.max_stream_payload must not be below limits.max_inline_payload"
                    .to_string(),
            ));
        }
        if self.router.delivery_timeout_ms == 0 {
            return Err(ApiError::ConfigError(
                "router.delivery_timeout_ms must be positive".to_string(),
            ));
        }
        if self.router.tenant_id.trim().is_empty() || self.router.tenant_id.contains('.') {
            return Err(ApiError::ConfigError(format!(
                "router.tenant_id '{}' must be non-empty and contain no '.'",
                self.router.tenant_id
            )));
        }
        let paging = &self.pagination;
        if paging.default_limit == 0 || paging.default_limit > paging.max_limit {
            return Err(ApiError::ConfigError(
                "pagination.default_limit must be in 1..=pagination.max_limit".to_string(),
            ));
        }
        Ok(())
    }
}

/// Payload size ceilings and chunking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_inline_payload")]
    pub max_inline_payload: u64,
    #[serde(default = "default_max_stream_payload")]
    pub max_stream_payload: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_max_inline_payload() -> u64 {
    DEFAULT_MAX_INLINE_PAYLOAD
}

fn default_max_stream_payload() -> u64 {
    DEFAULT_MAX_STREAM_PAYLOAD
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_inline_payload: default_max_inline_payload(),
            max_stream_payload: default_max_stream_payload(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Default lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Applied to contexts created with a zero TTL
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
    /// Lifetime of a consumer dedup record
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    /// Lifetime of stream progress and buffered chunks in the cache
    #[serde(default = "default_stream_progress_ttl_secs")]
    pub stream_progress_ttl_secs: u64,
}

fn default_context_ttl_secs() -> u64 {
    DEFAULT_CONTEXT_TTL_SECS
}

fn default_idempotency_ttl_secs() -> u64 {
    DEFAULT_IDEMPOTENCY_TTL_SECS
}

fn default_stream_progress_ttl_secs() -> u64 {
    86_400
}

impl TtlConfig {
    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn stream_progress_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_progress_ttl_secs)
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl_secs(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            stream_progress_ttl_secs: default_stream_progress_ttl_secs(),
        }
    }
}

/// Message routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Tenant segment of every destination address
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    /// Bound on waiting for a publish acknowledgment
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Default wait for a request-reply exchange
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_tenant_id() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl RouterConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Agent registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Agents silent for longer than this are marked offline
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

impl RegistryConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

/// Background expiry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// List paging bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_page_limit")]
    pub max_limit: usize,
}

fn default_page_limit() -> usize {
    100
}

fn default_max_page_limit() -> usize {
    1000
}

impl PaginationConfig {
    /// Zero means "use the default"; anything above the max is clamped.
    pub fn clamp(&self, limit: usize) -> usize {
        match limit {
            0 => self.default_limit,
            n => n.min(self.max_limit),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = BrokerConfig::default();
        assert_eq!(config.limits.max_inline_payload, 1_048_576);
        assert_eq!(config.limits.max_stream_payload, 104_857_600);
        assert_eq!(config.limits.chunk_size, 1_048_576);
        assert_eq!(config.ttl.context_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.ttl.idempotency_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.router.tenant_id, "default");
        assert_eq!(config.router.delivery_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        let mut config = BrokerConfig::default();
        config.limits.chunk_size = 2 * 1024 * 1024;
        assert!(matches!(config.validate(), Err(ApiError::ConfigError(_))));

        let mut config = BrokerConfig::default();
        config.limits.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dotted_tenant() {
        let mut config = BrokerConfig::default();
        config.router.tenant_id = "a.b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pagination_clamp() {
        let paging = PaginationConfig::default();
        assert_eq!(paging.clamp(0), 100);
        assert_eq!(paging.clamp(25), 25);
        assert_eq!(paging.clamp(5000), 1000);
    }
}
