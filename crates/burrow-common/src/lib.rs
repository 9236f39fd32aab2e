//! # burrow-common
//!
//! Identifier and key types shared across the burrow workspace:
//!
//! - [`Did`](types::did::Did): validated decentralized identifiers
//! - [`Tid`](types::tid::Tid): sortable timestamp identifiers used as repository revisions,
//!   plus the [`Ticker`](types::tid::Ticker) that hands out strictly increasing ones
//! - [`PublicKey`](types::crypto::PublicKey): Multikey public keys and conversions into
//!   the `k256`/`p256`/`ed25519-dalek` verifying key types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod types;

pub use error::{ParseError, ParseErrorKind};
pub use types::crypto::{CryptoError, KeyCodec, PublicKey};
pub use types::did::Did;
pub use types::tid::{Ticker, Tid};
