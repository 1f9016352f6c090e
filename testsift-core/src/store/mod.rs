// Persisted stores carried across invocations.

pub mod history;
mod persist;
pub mod usage;

pub use history::{RunHistoryStore, RunRecord};
pub use persist::{FORMAT_VERSION, LoadOutcome};
pub use usage::{UsageEntry, UsageGraphStore};
