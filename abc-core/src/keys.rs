//! Owned key material for a logged-in account.

use std::fmt;

use abc_crypto::rng::{Crng, RngExt};
use secrecy::{ExposeSecret, Secret};

use crate::error::{Error, Result};

/// The account master key: 32 random bytes generated at account creation
/// and never rotated. Everything in the account's sync repo is sealed
/// under it; password and recovery changes only rewrap it.
pub struct MasterKey(Secret<[u8; Self::LENGTH]>);

impl MasterKey {
    pub const LENGTH: usize = 32;

    pub fn generate<R: Crng>(rng: &mut R) -> Self {
        Self(Secret::new(rng.gen_bytes()))
    }

    /// Reconstruct from a decrypted key-wrap envelope.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes =
            <[u8; Self::LENGTH]>::try_from(bytes).map_err(|_| Error::DecryptError)?;
        Ok(Self(Secret::new(bytes)))
    }
}

impl ExposeSecret<[u8; MasterKey::LENGTH]> for MasterKey {
    fn expose_secret(&self) -> &[u8; Self::LENGTH] {
        self.0.expose_secret()
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self(Secret::new(*self.0.expose_secret()))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid formatting secrets.
        f.write_str("MasterKey(..)")
    }
}

/// The 20-byte opaque token naming the account's remote sync repo.
/// Hex-encoded everywhere it travels.
pub struct SyncKey(Secret<[u8; Self::LENGTH]>);

impl SyncKey {
    pub const LENGTH: usize = 20;

    pub fn generate<R: Crng>(rng: &mut R) -> Self {
        Self(Secret::new(rng.gen_bytes()))
    }

    /// Parse the hex transport form, e.g. out of a decrypted `ESyncKey`.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| Error::DecryptError)?;
        let bytes =
            <[u8; Self::LENGTH]>::try_from(bytes.as_slice()).map_err(|_| Error::DecryptError)?;
        Ok(Self(Secret::new(bytes)))
    }

    /// The hex transport form.
    pub fn hex(&self) -> String {
        hex::encode(self.0.expose_secret())
    }
}

impl Clone for SyncKey {
    fn clone(&self) -> Self {
        Self(Secret::new(*self.0.expose_secret()))
    }
}

impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncKey(..)")
    }
}
