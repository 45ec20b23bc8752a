//! Query and projection layer
//!
//! Read-only views over the batch store:
//! - merged off-chain/on-chain batch views, filtered by audience
//! - role-scoped listings
//! - operator listings of durable ledger failures
//!
//! Nothing here mutates a batch.

mod query;
mod view;

pub use query::*;
pub use view::*;
