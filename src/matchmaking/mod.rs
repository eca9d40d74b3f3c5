//! Room placement and match lifecycle

pub mod orchestrator;
pub mod registry;

pub use orchestrator::MatchOrchestrator;
pub use registry::{RoomOptions, RoomRegistry};
