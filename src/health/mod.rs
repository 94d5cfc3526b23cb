//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each dependency's heartbeat
//!     → Publish snapshot into state.rs
//!
//! Heartbeat (heartbeat.rs):
//!     GET <heartbeat path>
//!     → AND over the current snapshot
//!     → 200 ok / 503 bad
//! ```
//!
//! # Design Decisions
//! - A failed probe marks its dependency unhealthy for that cycle only
//! - Probe failures never reach the request path
//! - Snapshots are swapped whole; readers never see a half-updated cycle

pub mod active;
pub mod heartbeat;
pub mod state;

pub use active::HealthMonitor;
pub use heartbeat::HeartbeatStage;
pub use state::{HealthSnapshot, HealthState};
