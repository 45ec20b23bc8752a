//! Domain model for herbal batch tracking
//!
//! Batches, their lifecycle transitions, and the payloads callers submit.

mod batch;
mod request;
mod transition;
mod types;

pub use batch::*;
pub use request::*;
pub use transition::*;
pub use types::*;
