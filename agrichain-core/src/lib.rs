pub mod actor;
pub mod batch;
pub mod error;
pub mod id;
pub mod quantity;

// Re-export the main types for convenience
pub use actor::Role;
pub use batch::{Batch, BatchState, PriceEvent, QualityAttestation, QualityGrade, ReasonCode};
pub use error::LedgerError;
pub use id::{ActorId, BatchId};
pub use quantity::{PricePerKg, Quantity};
