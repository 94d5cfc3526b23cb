//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     backend URLs → origin.rs (resolve, normalize) → Upstream
//!     Upstreams + PublicConfig → rule.rs / api.rs → RouteStage
//!
//! Per request:
//!     RouteStage → matcher.rs (evaluate conditions)
//!     → Forward(upstream) or pass to next stage
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - No regex in hot path
//! - First match wins, in declaration order

pub mod api;
pub mod matcher;
pub mod origin;
pub mod rule;

pub use origin::{Origin, Role, Upstream};
pub use rule::{RouteAction, RouteRule, RouteStage};
