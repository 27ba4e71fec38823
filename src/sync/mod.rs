pub mod engine;
pub mod merge;
pub mod trends;
pub mod validate;

pub use engine::{CycleOutcome, CycleReport, SyncEngine, SyncSettings};
pub use merge::{merge, MergePolicy, MergeReport, Resolution};
pub use trends::{compute_trends, ordered_trends, Trend, TrendEntry};
pub use validate::{validate, ValidationOptions, ValidationResult};
