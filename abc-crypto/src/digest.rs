//! Thin wrappers over `ring` for hashing things with SHA-256 and HMAC.

use ring::digest::{Context, SHA256};
use ring::hmac;

pub const SHA256_LEN: usize = 32;

/// SHA-256 digest a single input.
pub fn sha256(input: &[u8]) -> [u8; SHA256_LEN] {
    sha256_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn sha256_many(inputs: &[&[u8]]) -> [u8; SHA256_LEN] {
    let mut ctx = Context::new(&SHA256);
    for input in inputs {
        ctx.update(input);
    }
    <[u8; SHA256_LEN]>::try_from(ctx.finish().as_ref())
        .expect("SHA-256 output is 32 bytes")
}

/// HMAC-SHA-256 over `msg` with `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    <[u8; 32]>::try_from(hmac::sign(&key, msg).as_ref())
        .expect("HMAC-SHA-256 output is 32 bytes")
}

/// HMAC-SHA-512 over `msg` with `key`.
pub fn hmac_sha512(key: &[u8], msg: &[u8]) -> [u8; 64] {
    let key = hmac::Key::new(hmac::HMAC_SHA512, key);
    <[u8; 64]>::try_from(hmac::sign(&key, msg).as_ref())
        .expect("HMAC-SHA-512 output is 64 bytes")
}
