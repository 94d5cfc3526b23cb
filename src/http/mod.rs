//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, drain gate)
//!     → pipeline.rs (ordered stages, routing decision)
//!     → forward.rs (stream request to the chosen origin and back)
//!     → Send to client
//! ```

pub mod forward;
pub mod pipeline;
pub mod server;

pub use forward::{ForwardError, ForwardOutcome, Forwarder};
pub use pipeline::{Flow, Pipeline, RequestContext, Stage};
pub use server::HttpServer;
