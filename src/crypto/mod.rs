//! Cryptographic primitives: license envelopes, digests, signing strings,
//! confirmation freshness.

pub mod codec;
pub mod digest;
pub mod freshness;
pub mod signing;
