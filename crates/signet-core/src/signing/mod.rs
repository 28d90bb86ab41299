//! Code signing document handling.
//!
//! This module provides functionality for:
//! - provisioning profile document parsing
//! - key pair and certificate signing request generation

pub mod csr;
pub mod profile;

pub use csr::*;
pub use profile::*;
