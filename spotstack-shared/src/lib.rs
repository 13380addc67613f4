//! Spotstack shared types.
//!
//! Error taxonomy and constants used by the provisioning core and its
//! command-line front end.

pub mod constants;
pub mod errors;

pub use errors::{SpotstackError, SpotstackResult};
