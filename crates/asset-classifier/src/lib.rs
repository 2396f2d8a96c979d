//! Asset classification for the tax pipeline.
//!
//! Rule-based preliminary classification, a persistent decision cache
//! keyed by stable external identifiers, and a capability-injected
//! oracle for the interactive-override path so the core runs headless
//! in batch mode and tests.

pub mod classifier;
pub mod heuristics;
pub mod oracle;
pub mod store;

pub use classifier::AssetClassifier;
pub use heuristics::{looks_like_fx_pair, preliminary_classification};
pub use oracle::{ClassificationDecision, ClassificationOracle, ConsoleOracle, PendingAsset};
pub use store::ClassificationStore;
