//! Random number generation utilities.

use std::num::NonZeroU32;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
pub use rand_core::{CryptoRng, RngCore, SeedableRng};
use ring::rand::SecureRandom;

use crate::digest;

const RAND_ERROR_CODE: NonZeroU32 =
    match NonZeroU32::new(rand_core::Error::CUSTOM_START) {
        Some(code) => code,
        None => unreachable!(),
    };

/// A succinct trait alias for a Cryptographically Secure PRNG.
pub trait Crng: RngCore + CryptoRng {}

impl<R: RngCore + CryptoRng> Crng for R {}

/// A compatibility wrapper so we can use `ring`'s PRG with `rand` traits.
#[derive(Clone, Debug)]
pub struct SysRng(ring::rand::SystemRandom);

impl SysRng {
    pub fn new() -> Self {
        Self(ring::rand::SystemRandom::new())
    }
}

impl Default for SysRng {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ring::rand::SystemRandom`] is a cryptographically secure PRG
impl CryptoRng for SysRng {}

impl RngCore for SysRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.try_fill_bytes(dest).expect("ring SystemRandom failed")
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.0
            .fill(dest)
            // ring's error type here is empty/unspecified anyway, so any
            // custom code will do.
            .map_err(|_| rand_core::Error::from(RAND_ERROR_CODE))
    }
}

/// The process-wide CSPRNG handed out by the core context.
///
/// Seeded exactly once, by hashing caller-supplied seed material together
/// with OS entropy and some volatile process state (wall clock, pid). The
/// caller material lets hosts with poor early-boot entropy contribute their
/// own; the OS entropy keeps a lazy caller from sinking the ship.
pub struct SeedRng(StdRng);

impl SeedRng {
    pub fn from_material(seed: &[u8]) -> Self {
        let mut os_entropy = [0u8; 32];
        SysRng::new().fill_bytes(&mut os_entropy);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let pid = process::id();

        let mixed = digest::sha256_many(&[
            seed,
            &os_entropy,
            &nanos.to_le_bytes(),
            &pid.to_le_bytes(),
        ]);
        Self(StdRng::from_seed(mixed))
    }

    /// A deterministic rng for tests. Not for production use; the output is
    /// entirely determined by `s`.
    pub fn from_u64(s: u64) -> Self {
        Self(StdRng::from_seed(digest::sha256(&s.to_le_bytes())))
    }
}

impl CryptoRng for SeedRng {}

impl RngCore for SeedRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    #[inline]
    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.0.try_fill_bytes(dest)
    }
}

/// Small convenience methods over any [`RngCore`].
pub trait RngExt {
    fn gen_bytes<const N: usize>(&mut self) -> [u8; N];
    fn gen_vec(&mut self, len: usize) -> Vec<u8>;
}

impl<R: RngCore> RngExt for R {
    fn gen_bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.fill_bytes(&mut out);
        out
    }

    fn gen_vec(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill_bytes(&mut out);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seed_rng_is_deterministic_from_u64() {
        let a: [u8; 32] = SeedRng::from_u64(42).gen_bytes();
        let b: [u8; 32] = SeedRng::from_u64(42).gen_bytes();
        let c: [u8; 32] = SeedRng::from_u64(43).gen_bytes();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn seeded_rngs_with_same_material_diverge() {
        // OS entropy and volatile state are mixed in, so identical caller
        // seeds must still produce independent streams.
        let a: [u8; 32] = SeedRng::from_material(&[1, 2, 3]).gen_bytes();
        let b: [u8; 32] = SeedRng::from_material(&[1, 2, 3]).gen_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn sys_rng_fills() {
        let out: [u8; 64] = SysRng::new().gen_bytes();
        assert_ne!(out, [0u8; 64]);
    }
}
