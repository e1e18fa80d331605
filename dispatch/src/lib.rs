pub mod engine;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod response;
pub mod transaction;

pub use engine::DispatchEngine;
pub use error::{ConflictReason, DispatchError, FailureKind, Missing};
pub use transaction::Assignment;
