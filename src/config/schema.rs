//! Configuration schema definitions.
//!
//! Every section and field has a default, so a missing file, section or
//! key falls back to the values below.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::{HealthCheckSettings, Thresholds};
use crate::interceptor::RetryPolicy;
use crate::load_balancer::EndpointSettings;
use crate::rpc::status::parse_code;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
    pub downstream: DownstreamConfig,
    pub observability: ObservabilityConfig,
}

/// Listener and server-side pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
    /// Server-side timeout interceptor, per call.
    pub handler_timeout_ms: u64,
    /// Whole-request timeout on the plain HTTP side.
    pub http_timeout_ms: u64,
    /// How long shutdown waits for open connections.
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            port: 8004,
            max_connections: 10_000,
            handler_timeout_ms: 60_000,
            http_timeout_ms: 90_000,
            drain_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// In-process store; discovery only works inside one process.
    Memory,
    /// etcd v3 through its JSON gateway.
    Etcd,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub etcd_endpoint: String,
    pub request_timeout_ms: u64,
    pub namespace: String,
    pub lease_ttl_secs: u64,
    /// Address published for this server. Defaults to `127.0.0.1:{port}`.
    pub advertise_address: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            etcd_endpoint: "http://localhost:2379".to_owned(),
            request_timeout_ms: 5_000,
            namespace: "gp-programming-tour".to_owned(),
            lease_ttl_secs: 60,
            advertise_address: None,
        }
    }
}

impl RegistryConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Outbound client settings, used by `tag-client`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Direct addresses; when empty the service is resolved through the registry.
    pub targets: Vec<String>,
    /// Overall deadline per call, retries included.
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub healthy_threshold: usize,
    pub unhealthy_threshold: usize,
    /// Time an unhealthy endpoint is skipped before a call may try it again.
    pub unhealthy_cooldown_ms: u64,
    pub retry: RetryConfig,
    pub health_check: HealthCheckConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            timeout_ms: 60_000,
            connect_timeout_ms: 1_000,
            healthy_threshold: 1,
            unhealthy_threshold: 3,
            unhealthy_cooldown_ms: 5_000,
            retry: RetryConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            thresholds: Thresholds {
                healthy: self.healthy_threshold,
                unhealthy: self.unhealthy_threshold,
                cooldown: Duration::from_millis(self.unhealthy_cooldown_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Retryable status codes by name (`"unavailable"`, `"DEADLINE_EXCEEDED"`, ...).
    pub codes: Vec<String>,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub per_attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            codes: ["unknown", "internal", "deadline_exceeded", "unavailable"]
                .map(str::to_owned)
                .to_vec(),
            base_backoff_ms: 50,
            max_backoff_ms: 1_000,
            per_attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Unknown code names are skipped here; validation reports them.
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts)
            .with_codes(self.codes.iter().filter_map(|name| parse_code(name)))
            .with_backoff(
                Duration::from_millis(self.base_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            );
        match self.per_attempt_timeout_ms {
            Some(ms) => policy.with_per_attempt_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 2,
            path: "/ping".to_owned(),
        }
    }
}

impl HealthCheckConfig {
    pub fn settings(&self) -> HealthCheckSettings {
        HealthCheckSettings {
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            path: self.path.clone(),
        }
    }
}

/// The business API the tag service reads from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub base_url: String,
    /// Used when the call carries no deadline.
    pub timeout_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_owned(),
            timeout_ms: 10_000,
        }
    }
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerKind {
    Log,
    Noop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_address: String,
    pub tracer: TracerKind,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_owned(),
            tracer: TracerKind::Log,
        }
    }
}
