//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MeshConfig (validated, immutable)
//!     → CLI flags override (port, log level)
//!     → lifecycle::startup builds every subsystem from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults so an absent file or section is valid
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ClientConfig, DownstreamConfig, HealthCheckConfig, MeshConfig, ObservabilityConfig,
    RegistryBackend, RegistryConfig, RetryConfig, ServerConfig, TracerKind,
};
pub use validation::{validate_config, ValidationError};
