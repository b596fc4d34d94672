use crate::batch::BatchState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a supply-chain participant.
///
/// Roles are bound to actors by the external identity service and arrive
/// with each request as a claim; the ledger only consults the permission
/// table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Farmer,
    Distributor,
    Retailer,
    Consumer,
}

impl Role {
    /// Static permission table: whether this role may drive a batch into
    /// `state`.
    ///
    /// Rejection is permitted for every role; custody and the required
    /// reason code are enforced by the transition engine, not here.
    pub fn may_drive(&self, state: BatchState) -> bool {
        match state {
            BatchState::Created => matches!(self, Role::Farmer),
            BatchState::QualityChecked | BatchState::InStorage | BatchState::InTransit => {
                matches!(self, Role::Distributor)
            }
            BatchState::Received | BatchState::Sold => matches!(self, Role::Retailer),
            BatchState::Rejected => true,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Farmer => "farmer",
            Role::Distributor => "distributor",
            Role::Retailer => "retailer",
            Role::Consumer => "consumer",
        };
        write!(f, "{}", name)
    }
}
