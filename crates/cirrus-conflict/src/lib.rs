//! Cirrus Conflict - Conflict detection and resolution
//!
//! Provides:
//! - Divergence detection between a local item and its remote counterpart
//! - Resolution plans for every (conflict type, option) pair and their execution
//! - Conflict copy naming for keep-both resolutions
//! - Glob-based automatic resolution policy

pub mod detector;
pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use detector::{ConflictDetector, DetectionResult};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::{AutoStrategy, PolicyEngine};
pub use resolver::{BatchResult, ConflictResolver, PlanOperation, PlanOutcome, PlanTransfers, ResolutionPlan};
