//! The account key derivation graph.
//!
//! Every account key is a 32-byte scrypt output over the normalized
//! username, optionally concatenated with the password or the recovery
//! answers:
//!
//! ```text
//! user_id          L1   = scrypt(username,             server SNRP)
//! password_auth    LP1  = scrypt(username ‖ password,  server SNRP)
//! password_unlock  LP2  = scrypt(username ‖ password,  SNRP2)
//! recovery_auth    LRA1 = scrypt(username ‖ answers,   server SNRP)
//! recovery_unlock  LRA3 = scrypt(username ‖ answers,   SNRP3)
//! questions_key    L4   = scrypt(username,             SNRP4)
//! ```
//!
//! The server-SNRP outputs are the only keys that ever leave the device.
//! These functions do no I/O; the only failures are bad scrypt parameters.

use abc_crypto::snrp::Snrp;
use secrecy::Secret;
use zeroize::Zeroizing;

use crate::error::Result;

/// L1: the server-visible account identifier. Not a secret; the server
/// stores it in the clear.
pub fn user_id(username: &str, snrp1: &Snrp) -> Result<[u8; 32]> {
    Ok(snrp1.hash(username.as_bytes())?)
}

/// LP1: the server password authenticator.
pub fn password_auth(
    username: &str,
    password: &str,
    snrp1: &Snrp,
) -> Result<Secret<[u8; 32]>> {
    derive(&joined(username, password), snrp1)
}

/// LP2: the local key that wraps the master key via the password.
pub fn password_unlock(
    username: &str,
    password: &str,
    snrp2: &Snrp,
) -> Result<Secret<[u8; 32]>> {
    derive(&joined(username, password), snrp2)
}

/// LRA1: the server recovery authenticator.
pub fn recovery_auth(
    username: &str,
    answers: &str,
    snrp1: &Snrp,
) -> Result<Secret<[u8; 32]>> {
    derive(&joined(username, answers), snrp1)
}

/// LRA3: the local key that wraps the master key via the recovery answers.
pub fn recovery_unlock(
    username: &str,
    answers: &str,
    snrp3: &Snrp,
) -> Result<Secret<[u8; 32]>> {
    derive(&joined(username, answers), snrp3)
}

/// L4: the key that wraps the recovery-questions blob in the CarePackage.
pub fn questions_key(username: &str, snrp4: &Snrp) -> Result<Secret<[u8; 32]>> {
    derive(username.as_bytes(), snrp4)
}

fn derive(data: &[u8], snrp: &Snrp) -> Result<Secret<[u8; 32]>> {
    Ok(Secret::new(snrp.hash(data)?))
}

fn joined(username: &str, suffix: &str) -> Zeroizing<Vec<u8>> {
    let mut buf = Vec::with_capacity(username.len() + suffix.len());
    buf.extend_from_slice(username.as_bytes());
    buf.extend_from_slice(suffix.as_bytes());
    Zeroizing::new(buf)
}
