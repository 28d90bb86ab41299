//! Signet Core Library
//!
//! Keeps code-signing credentials in agreement across an encrypted git
//! secret store, the developer portal, and the local keychain.

pub mod config;
pub mod crypto;
pub mod error;
pub mod fsutil;
pub mod install;
pub mod keychain;
pub mod models;
pub mod portal;
mod process;
pub mod reconcile;
pub mod signing;
pub mod store;

pub use error::{Result, SignetError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
