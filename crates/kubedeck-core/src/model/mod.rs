// ── Domain model ──
//
// Identity and status types shared by every lifecycle component and
// handed to interface consumers.

pub mod identity;
pub mod status;

pub use identity::{ClusterIdentity, ParseIdentityError};
pub use status::{ClusterStatus, Connectivity};
