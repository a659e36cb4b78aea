//! Infrastructure layer: shared-store coordination, membership storage,
//! background jobs and the control surface in front of them.

pub mod config;
pub mod control;
pub mod coordination;
pub mod jobs;
pub mod kv;
pub mod membership;


pub use config::OrchestratorConfig;
pub use control::{CancelAck, ControlSurface};
