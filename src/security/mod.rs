//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → overload.rs (shed when the runtime lags)
//!     → limits.rs (check request body size)
//!     → headers.rs (https redirect; security + legacy response headers)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Cheap checks first: shedding costs one atomic load
//! - Oversized bodies are refused before they are read

pub mod headers;
pub mod limits;
pub mod overload;

pub use headers::{LegacyHeadersStage, TransportSecurityStage};
pub use limits::BodyLimitStage;
pub use overload::{LagMonitor, ShedStage};
