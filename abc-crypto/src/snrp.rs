//! SNRP: scrypt parameter bundles (salt, N, r, p).

use serde::{Deserialize, Serialize};

use crate::rng::{Crng, RngExt};
use crate::CryptoError;

/// scrypt output length for every derivation in the system.
pub const HASH_LEN: usize = 32;

const SALT_LEN: usize = 32;

// Cost settings shared with the login server; these cannot change, since
// the server stores hashes derived under them.
const SCRYPT_N: u64 = 16384;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;

/// The fixed public salt for derivations shared with the login server
/// (account identifier and authenticators).
const SERVER_SALT: [u8; SALT_LEN] = [
    0xb5, 0x86, 0x5f, 0xfb, 0x9f, 0xa7, 0xb3, 0xbf, //
    0xe4, 0xb2, 0x38, 0x4d, 0x47, 0xce, 0x83, 0x1e, //
    0xe2, 0x2a, 0x4a, 0x9d, 0x5c, 0x34, 0xc7, 0xef, //
    0x7d, 0x21, 0x46, 0x7c, 0xc7, 0x58, 0xf8, 0x1b,
];

/// A scrypt parameter bundle.
///
/// JSON form: `{"salt_hex": "…", "n": …, "r": …, "p": …}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Snrp {
    #[serde(rename = "salt_hex", with = "hex_bytes")]
    pub salt: Vec<u8>,
    pub n: u64,
    pub r: u32,
    pub p: u32,
}

impl Snrp {
    /// The preset for keys shared with the server: fixed public salt.
    pub fn server() -> Self {
        Self {
            salt: SERVER_SALT.to_vec(),
            n: SCRYPT_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
        }
    }

    /// A fresh client preset: same cost settings, random 32-byte salt.
    /// Used for keys that never leave the device.
    pub fn generate_client<R: Crng>(rng: &mut R) -> Self {
        Self {
            salt: rng.gen_vec(SALT_LEN),
            n: SCRYPT_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
        }
    }

    /// `scrypt(data, self)` to a 32-byte key.
    pub fn hash(&self, data: &[u8]) -> Result<[u8; HASH_LEN], CryptoError> {
        let params = self.params()?;
        let mut out = [0u8; HASH_LEN];
        scrypt::scrypt(data, &self.salt, &params, &mut out)
            .map_err(|_| CryptoError::ScryptParams)?;
        Ok(out)
    }

    fn params(&self) -> Result<scrypt::Params, CryptoError> {
        // scrypt takes log2(N); N must be an exact power of two.
        if !self.n.is_power_of_two() || self.n < 2 {
            return Err(CryptoError::ScryptParams);
        }
        let log_n = self.n.trailing_zeros() as u8;
        scrypt::Params::new(log_n, self.r, self.p, HASH_LEN)
            .map_err(|_| CryptoError::ScryptParams)
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::SeedRng;

    // RFC 7914 §12, second vector (N=1024, r=8, p=16), truncated to our
    // 32-byte output length. scrypt's final PBKDF2 pass computes output
    // blocks independently, so the prefix is unaffected by dkLen.
    #[test]
    fn test_scrypt_vector() {
        let snrp = Snrp {
            salt: b"NaCl".to_vec(),
            n: 1024,
            r: 8,
            p: 16,
        };
        let out = snrp.hash(b"password").unwrap();
        let expected =
            "fdbabe1c9d3472007856e7190d01e9fe7c6ad7cbc8237830e77376634b373162";
        assert_eq!(hex::encode(out), expected);
    }

    #[test]
    fn test_snrp_json() {
        let snrp = Snrp::server();
        let json = serde_json::to_string(&snrp).unwrap();
        assert!(json.contains("\"salt_hex\""));
        assert!(json.contains("\"n\":16384"));

        let snrp2: Snrp = serde_json::from_str(&json).unwrap();
        assert_eq!(snrp, snrp2);
    }

    #[test]
    fn test_client_snrp_salts_differ() {
        let mut rng = SeedRng::from_u64(7);
        let a = Snrp::generate_client(&mut rng);
        let b = Snrp::generate_client(&mut rng);
        assert_ne!(a.salt, b.salt);
        assert_eq!(a.n, b.n);

        // Different salts, different keys.
        let ha = a.hash(b"some input").unwrap();
        let hb = b.hash(b"some input").unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_bad_params_rejected() {
        let mut snrp = Snrp::server();
        snrp.n = 1000; // not a power of two
        assert_eq!(snrp.hash(b"x"), Err(CryptoError::ScryptParams));

        let mut snrp = Snrp::server();
        snrp.r = 0;
        assert_eq!(snrp.hash(b"x"), Err(CryptoError::ScryptParams));
    }
}
