//! Cryptographic primitives for the ABC account system.
//!
//! This crate holds everything below the account layer: randomness
//! ([`rng`]), scrypt parameter bundles ([`snrp`]), SHA-256 / HMAC helpers
//! ([`digest`]), and the authenticated Encrypted-JSON envelope
//! ([`envelope`]) that every encrypted artifact in the system uses.

use thiserror::Error;

pub mod digest;
pub mod envelope;
pub mod rng;
pub mod snrp;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    /// The envelope or its contents are structurally broken (bad JSON, bad
    /// hex/base64, truncated pre-image, unknown encryption type).
    #[error("decrypt error: {0}")]
    Decrypt(&'static str),

    /// The decrypted pre-image failed its integrity check. Callers use this
    /// to detect a wrong key, as opposed to corrupted input.
    #[error("decrypted data failed checksum")]
    BadChecksum,

    #[error("bad scrypt parameters")]
    ScryptParams,
}
