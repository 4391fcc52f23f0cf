//! # basalt-primitives
//!
//! Value types shared by every layer of the Basalt execution core.
//!
//! - [`Word256`]: the 256-bit unsigned integer the stack machine computes on.
//! - [`Address`]: 20-byte account/contract identifier with hex rendering.
//! - [`hashing`]: SHA-256 and Keccak-256 helpers.
//!
//! All arithmetic on [`Word256`] wraps modulo 2^256; division and modulo by
//! zero yield zero. These conventions are part of the replay contract and
//! must not change between releases.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod hashing;
pub mod word256;

pub use address::{derive_address, is_valid_address, Address, AddressError};
pub use hashing::{keccak256, sha256};
pub use word256::{Word256, Word256Error};
