//! Network-level bookkeeping.
//!
//! # Data Flow
//! ```text
//! Pipeline forward
//!     → connection.rs (guard per in-flight forward)
//!     → shutdown waits for the count to reach zero
//! ```

pub mod connection;
