//! The authenticated Encrypted-JSON envelope used by every encrypted
//! artifact in the account system.
//!
//! The plaintext pre-image, before AES-256-CBC:
//!
//! ```text
//! 1 byte:    h (number of random header bytes)
//! h bytes:   random header
//! 4 bytes:   length of data (big endian)
//! x bytes:   data
//! 1 byte:    f (number of random footer bytes)
//! f bytes:   random footer
//! 32 bytes:  SHA-256 of everything above
//! ```
//!
//! The sealed envelope serializes as JSON:
//!
//! ```json
//! { "encryptionType": 0, "iv_hex": "…", "data_base64": "…" }
//! ```
//!
//! Type 0 encrypts under the caller-supplied key directly; type 1 first
//! stretches the key with scrypt, carrying the parameters in an embedded
//! `"SNRP"` member. The random header/footer blurs the plaintext length on
//! the wire; it is advisory, not a security property.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::digest;
use crate::rng::{Crng, RngExt};
use crate::snrp::Snrp;
use crate::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_KEY_LEN: usize = 32;
const AES_IV_LEN: usize = 16;
const LEN_FIELD_LEN: usize = 4;
const SHA256_LEN: usize = digest::SHA256_LEN;

/// How the AES key is obtained from the caller's key material.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncryptionType {
    /// AES-256 with the caller-supplied key.
    Aes256,
    /// AES-256 with `scrypt(key, SNRP)`; the SNRP rides in the envelope.
    Aes256Scrypt,
}

impl EncryptionType {
    fn to_wire(self) -> u8 {
        match self {
            Self::Aes256 => 0,
            Self::Aes256Scrypt => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self, CryptoError> {
        match value {
            0 => Ok(Self::Aes256),
            1 => Ok(Self::Aes256Scrypt),
            _ => Err(CryptoError::Decrypt("unknown encryption type")),
        }
    }
}

/// A sealed Encrypted-JSON envelope.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "encryptionType")]
    encryption_type: u8,
    iv_hex: String,
    data_base64: String,
    #[serde(rename = "SNRP", default, skip_serializing_if = "Option::is_none")]
    snrp: Option<Snrp>,
}

impl Envelope {
    /// Render as a JSON document, matching the on-disk format.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self)
            .expect("envelope serialization cannot fail")
    }

    pub fn from_json_str(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json)
            .map_err(|_| CryptoError::Decrypt("bad envelope JSON"))
    }
}

/// Seal `plaintext` under `key` into an [`Envelope`].
///
/// The key may be any length; AES-256 uses its first 32 bytes, zero-padded
/// when shorter. With a fresh rng the ciphertext differs on every call,
/// even for identical inputs.
pub fn seal<R: Crng>(
    rng: &mut R,
    plaintext: &[u8],
    key: &[u8],
    typ: EncryptionType,
) -> Result<Envelope, CryptoError> {
    let (mut aes_key, snrp) = match typ {
        EncryptionType::Aes256 => (pad_to::<AES_KEY_LEN>(key), None),
        EncryptionType::Aes256Scrypt => {
            let snrp = Snrp::generate_client(rng);
            (snrp.hash(key)?, Some(snrp))
        }
    };
    let iv: [u8; AES_IV_LEN] = rng.gen_bytes();

    let mut preimage = build_preimage(rng, plaintext)?;
    let ciphertext = Aes256CbcEnc::new(&aes_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&preimage);
    preimage.zeroize();
    aes_key.zeroize();

    Ok(Envelope {
        encryption_type: typ.to_wire(),
        iv_hex: hex::encode(iv),
        data_base64: BASE64.encode(ciphertext),
        snrp,
    })
}

/// Open an [`Envelope`] with `key`, returning the original plaintext.
///
/// Structural problems (bad JSON fields, truncated pre-image) yield
/// [`CryptoError::Decrypt`]; an intact envelope that fails its integrity
/// check (the wrong-key case) yields [`CryptoError::BadChecksum`].
pub fn open(envelope: &Envelope, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let typ = EncryptionType::from_wire(envelope.encryption_type)?;
    let mut aes_key = match typ {
        EncryptionType::Aes256 => pad_to::<AES_KEY_LEN>(key),
        EncryptionType::Aes256Scrypt => {
            let snrp = envelope
                .snrp
                .as_ref()
                .ok_or(CryptoError::Decrypt("missing SNRP"))?;
            snrp.hash(key)?
        }
    };

    let iv_bytes = hex::decode(&envelope.iv_hex)
        .map_err(|_| CryptoError::Decrypt("bad iv hex"))?;
    let iv = pad_to::<AES_IV_LEN>(&iv_bytes);
    let ciphertext = BASE64
        .decode(&envelope.data_base64)
        .map_err(|_| CryptoError::Decrypt("bad data base64"))?;

    // A padding failure means the key was wrong or the ciphertext was
    // altered, same as a checksum mismatch.
    let decrypted = Aes256CbcDec::new(&aes_key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::BadChecksum);
    aes_key.zeroize();
    let mut preimage = decrypted?;

    let result = parse_preimage(&preimage);
    preimage.zeroize();
    result
}

/// Seal, then render straight to a JSON string.
pub fn seal_json_string<R: Crng>(
    rng: &mut R,
    plaintext: &[u8],
    key: &[u8],
    typ: EncryptionType,
) -> Result<String, CryptoError> {
    seal(rng, plaintext, key, typ).map(|env| env.to_json_string())
}

/// Parse a JSON envelope string and open it.
pub fn open_json_str(json: &str, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    open(&Envelope::from_json_str(json)?, key)
}

fn build_preimage<R: Crng>(
    rng: &mut R,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let data_len =
        u32::try_from(data.len()).map_err(|_| CryptoError::Encrypt)?;
    let header_len = rng.gen_bytes::<1>()[0] as usize;
    let footer_len = rng.gen_bytes::<1>()[0] as usize;

    let mut out = Vec::with_capacity(
        1 + header_len + LEN_FIELD_LEN + data.len() + 1 + footer_len
            + SHA256_LEN,
    );
    out.push(header_len as u8);
    out.extend_from_slice(&rng.gen_vec(header_len));
    out.extend_from_slice(&data_len.to_be_bytes());
    out.extend_from_slice(data);
    out.push(footer_len as u8);
    out.extend_from_slice(&rng.gen_vec(footer_len));

    let sha = digest::sha256(&out);
    out.extend_from_slice(&sha);
    Ok(out)
}

fn parse_preimage(buf: &[u8]) -> Result<Vec<u8>, CryptoError> {
    const TOO_SHORT: CryptoError =
        CryptoError::Decrypt("decrypted data is not long enough");

    let header_len = *buf.first().ok_or(TOO_SHORT)? as usize;
    // Minimum size assuming an empty data section and footer.
    if buf.len() < 1 + header_len + LEN_FIELD_LEN + 1 + SHA256_LEN {
        return Err(TOO_SHORT);
    }

    let len_at = 1 + header_len;
    let data_len = u32::from_be_bytes(
        buf[len_at..len_at + LEN_FIELD_LEN]
            .try_into()
            .expect("slice is 4 bytes"),
    ) as usize;
    let data_at = len_at + LEN_FIELD_LEN;
    if buf.len() < data_at + data_len + 1 + SHA256_LEN {
        return Err(TOO_SHORT);
    }

    let footer_len = buf[data_at + data_len] as usize;
    let tagged_len = data_at + data_len + 1 + footer_len;
    if buf.len() < tagged_len + SHA256_LEN {
        return Err(TOO_SHORT);
    }

    let expected = digest::sha256(&buf[..tagged_len]);
    let actual = &buf[tagged_len..tagged_len + SHA256_LEN];
    // This error specifically lets the caller conclude the key was wrong.
    if ring::constant_time::verify_slices_are_equal(&expected, actual)
        .is_err()
    {
        return Err(CryptoError::BadChecksum);
    }

    Ok(buf[data_at..data_at + data_len].to_vec())
}

/// Truncate or zero-pad `bytes` to exactly `N`.
fn pad_to<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}
