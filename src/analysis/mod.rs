//! Analysis orchestration: lifecycle driving and result aggregation.

pub mod aggregator;
pub mod coordinator;

pub use aggregator::{dedupe_values, ResultAccumulator};
pub use coordinator::{AnalysisCoordinator, AnalysisState, CompletedAnalysis};
