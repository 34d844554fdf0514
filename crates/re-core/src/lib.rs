//! Shared identity types and error kinds for the remote execution cache.
//!
//! This crate has no knowledge of storage tiers, transport, or scheduling —
//! it exists so every other crate in the workspace can agree on what a
//! [`Digest`] is, how a [`ResourceName`] parses, and which [`Error`] kind a
//! failure belongs to.

pub mod constants;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod resource_name;

pub use digest::{Digest, EMPTY_SHA};
pub use error::{Error, Result};
pub use resource_name::{Compressor, ResourceName, ResourceNameError};
