//! Configuration validation.
//!
//! Runs after serde, before anything is built from the config, and
//! reports every problem at once.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{MeshConfig, RegistryBackend};
use crate::rpc::status::parse_code;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.socket_addr().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("not an IP address: {:?}", server.bind_address),
        ));
    }
    if server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be > 0"));
    }
    if server.handler_timeout_ms == 0 {
        errors.push(ValidationError::new("server.handler_timeout_ms", "must be > 0"));
    }
    if server.http_timeout_ms == 0 {
        errors.push(ValidationError::new("server.http_timeout_ms", "must be > 0"));
    } else if server.http_timeout_ms <= server.handler_timeout_ms {
        // Otherwise the outer HTTP timeout fires first and the caller gets a bare 408.
        errors.push(ValidationError::new(
            "server.http_timeout_ms",
            "must exceed handler_timeout_ms",
        ));
    }

    let registry = &config.registry;
    if registry.lease_ttl_secs == 0 {
        errors.push(ValidationError::new("registry.lease_ttl_secs", "must be > 0"));
    }
    if registry.namespace.trim_matches('/').is_empty() {
        errors.push(ValidationError::new("registry.namespace", "must not be empty"));
    }
    if registry.backend == RegistryBackend::Etcd && url::Url::parse(&registry.etcd_endpoint).is_err() {
        errors.push(ValidationError::new(
            "registry.etcd_endpoint",
            format!("not a URL: {:?}", registry.etcd_endpoint),
        ));
    }

    let client = &config.client;
    if client.timeout_ms == 0 {
        errors.push(ValidationError::new("client.timeout_ms", "must be > 0"));
    }
    if client.healthy_threshold == 0 || client.unhealthy_threshold == 0 {
        errors.push(ValidationError::new("client.thresholds", "must be > 0"));
    }
    if client.retry.max_attempts == 0 {
        errors.push(ValidationError::new("client.retry.max_attempts", "must be >= 1"));
    }
    for name in &client.retry.codes {
        if parse_code(name).is_none() {
            errors.push(ValidationError::new(
                "client.retry.codes",
                format!("unknown status code {name:?}"),
            ));
        }
    }
    if client.retry.base_backoff_ms > client.retry.max_backoff_ms {
        errors.push(ValidationError::new(
            "client.retry.base_backoff_ms",
            "must not exceed max_backoff_ms",
        ));
    }
    if client.health_check.enabled && client.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("client.health_check.interval_secs", "must be > 0"));
    }

    if url::Url::parse(&config.downstream.base_url).is_err() {
        errors.push(ValidationError::new(
            "downstream.base_url",
            format!("not a URL: {:?}", config.downstream.base_url),
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
