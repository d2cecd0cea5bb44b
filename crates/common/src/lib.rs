//! Shared types for tlsinit.
//!
//! - [`Domain`] and [`ContactEmail`]: validated inputs for certificate issuance
//! - [`StepOutcome`]: explicit result of an idempotent step

pub mod outcome;
pub mod types;

pub use outcome::StepOutcome;
pub use types::{ContactEmail, Domain, ValueError};
