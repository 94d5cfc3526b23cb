//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Draining → stop accepting → drain in-flight → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → begin drain
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: in-flight work is abandoned after the deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownState};
