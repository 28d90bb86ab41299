//! Domain models for credential reconciliation.

pub mod portal;
pub mod signing;

pub use portal::*;
pub use signing::*;
