//! Graph analysis: dependency injection, topological sort, content digests,
//! and the read-only reporting summary.

pub mod content_digest;
pub mod dependency;
pub mod summary;
pub mod toposort;

pub use content_digest::operation_content_digest;
pub use dependency::{cross_stage_dependencies, intra_stage_dependencies, DependencyEdge};
pub use summary::{summarize, GraphAnalysisSummary};
pub use toposort::topological_sort;
