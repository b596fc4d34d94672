//! Runtime components of the AgriChain batch provenance ledger: the
//! materialized batch registry, the transition engine, the split/merge
//! resolver, the trace service, and the service facade that ties them to
//! one append-only store.

pub mod engine;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod trace;

// Re-export the main types for convenience
pub use engine::{ChangeRequest, TransitionEngine};
pub use registry::BatchRegistry;
pub use resolver::SplitMergeResolver;
pub use service::ProvenanceService;
pub use trace::{TraceService, VerificationReport};
