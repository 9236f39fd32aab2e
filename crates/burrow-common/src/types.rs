//! Identifier types

/// Multikey public keys
pub mod crypto;
/// Decentralized identifiers
pub mod did;
/// Timestamp identifiers and the revision ticker
pub mod tid;
