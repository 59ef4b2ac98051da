//! Common types and utilities for the ndnd forwarder.
//!
//! This crate provides the shared vocabulary of the face system: the TLV
//! codec, NDN packet types, face URIs, face enumerations, and counters.

pub mod counters;
pub mod error;
pub mod face;
pub mod ndn;
pub mod tlv;
pub mod uri;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
