//! Distributed ownership plane: membership, HRW sharding, leases, assignment

pub mod assignment;
pub mod lease;
pub mod membership;
pub mod sharding;

pub use assignment::{AssignmentController, AssignmentSettings, SymbolHost};
pub use lease::{Lease, LeaseManager};
pub use membership::{Membership, NodeRecord};
pub use sharding::{hrw_weight, select_owner};
