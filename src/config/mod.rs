//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment (+ optional .env)
//!     → loader.rs (read, parse, resolve backend origins)
//!     → RouterConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - Every optional setting has a default; required backends do not
//! - Any parse or resolution failure is fatal before a socket is bound

pub mod loader;
pub mod schema;

pub use loader::ConfigError;
pub use schema::{
    BackendConfig, HealthCheckConfig, ListenerConfig, OverloadConfig, PublicConfig, RouterConfig,
    SecurityConfig, TimeoutConfig,
};
