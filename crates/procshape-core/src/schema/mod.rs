//! Schema pipeline: metadata boundary, selection, forwarding and the
//! orchestrator that ties them to the analyzer and the stores.

pub mod filter;
pub mod forwarding;
pub mod orchestrator;
pub mod source;

pub use orchestrator::{RunOutput, RunSummary, SchemaOrchestrator, SchemaOutput};
pub use source::{CancellationToken, InMemorySource, MetadataSource, ObjectHeader};
