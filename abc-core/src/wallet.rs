//! Per-wallet key records in the account's sync repo.
//!
//! Each wallet is one JSON file at `sync/Wallets/<UUID>.json`, sealed
//! under the account master key:
//!
//! ```json
//! { "MK": "…", "BitcoinSeed": "…", "SyncKey": "…",
//!   "Archived": false, "SortIndex": 0 }
//! ```
//!
//! Files in the `Wallets/` directory that are not wallet records (a stem
//! that is not a UUID, or contents that do not decrypt) are skipped and
//! logged, never deleted: a record written by a newer build must survive a
//! pass by an older one.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use abc_crypto::envelope::{self, EncryptionType};
use abc_crypto::rng::{Crng, RngExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::login::SyncKeys;
use crate::store;

pub(crate) const WALLET_DIR: &str = "Wallets";

const WALLET_MK_LEN: usize = 32;
const WALLET_SEED_LEN: usize = 32;
const WALLET_SYNC_KEY_LEN: usize = 20;

/// One wallet's keys and bookkeeping.
#[derive(Clone)]
pub struct WalletInfo {
    pub id: Uuid,
    /// The per-wallet master key (not the account MK).
    pub mk: Zeroizing<Vec<u8>>,
    pub bitcoin_seed: Zeroizing<Vec<u8>>,
    /// Names this wallet's own remote repo.
    pub sync_key: Zeroizing<Vec<u8>>,
    pub archived: bool,
    pub sort_index: u32,
}

impl WalletInfo {
    /// A fresh wallet record with new random key material, appended at
    /// `sort_index`.
    pub fn generate<R: Crng>(rng: &mut R, sort_index: u32) -> Self {
        Self {
            id: uuid::Builder::from_random_bytes(rng.gen_bytes()).into_uuid(),
            mk: Zeroizing::new(rng.gen_vec(WALLET_MK_LEN)),
            bitcoin_seed: Zeroizing::new(rng.gen_vec(WALLET_SEED_LEN)),
            sync_key: Zeroizing::new(rng.gen_vec(WALLET_SYNC_KEY_LEN)),
            archived: false,
            sort_index,
        }
    }
}

impl fmt::Debug for WalletInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletInfo")
            .field("id", &self.id)
            .field("archived", &self.archived)
            .field("sort_index", &self.sort_index)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct WalletInfoFile {
    #[serde(rename = "MK")]
    mk: String,
    #[serde(rename = "BitcoinSeed")]
    bitcoin_seed: String,
    #[serde(rename = "SyncKey")]
    sync_key: String,
    #[serde(rename = "Archived")]
    archived: bool,
    #[serde(rename = "SortIndex")]
    sort_index: u32,
}

/// List every wallet record, ordered by `SortIndex` ascending; ties keep
/// directory order.
pub fn list(keys: &SyncKeys) -> Result<Vec<WalletInfo>> {
    let dir = wallet_dir(keys);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::FileOpenError(err)),
    };

    let mut wallets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(Error::FileReadError)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".json") else { continue };
        let Ok(id) = Uuid::parse_str(stem) else {
            warn!(file = name, "ignoring non-wallet file in Wallets dir");
            continue;
        };
        match load(keys, &id) {
            Ok(info) => wallets.push(info),
            Err(err) => warn!(%id, "ignoring unreadable wallet record: {err}"),
        }
    }

    // sort_by_key is stable, preserving load order on equal indices.
    wallets.sort_by_key(|info| info.sort_index);
    Ok(wallets)
}

/// Read and decrypt a single wallet record.
pub fn load(keys: &SyncKeys, id: &Uuid) -> Result<WalletInfo> {
    let sealed = match fs::read_to_string(wallet_path(keys, id)) {
        Ok(sealed) => sealed,
        Err(err) if err.kind() == ErrorKind::NotFound =>
            return Err(Error::FileDoesNotExist),
        Err(err) => return Err(Error::FileReadError(err)),
    };
    let plaintext = Zeroizing::new(envelope::open_json_str(
        &sealed,
        keys.mk.expose_secret(),
    )?);
    let file: WalletInfoFile = serde_json::from_slice(&plaintext)?;

    Ok(WalletInfo {
        id: *id,
        mk: decode_hex_field(&file.mk)?,
        bitcoin_seed: decode_hex_field(&file.bitcoin_seed)?,
        sync_key: decode_hex_field(&file.sync_key)?,
        archived: file.archived,
        sort_index: file.sort_index,
    })
}

/// Encrypt and write a single wallet record (replace-whole-file).
pub fn save<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    info: &WalletInfo,
) -> Result<()> {
    let dir = wallet_dir(keys);
    fs::create_dir_all(&dir).map_err(Error::FileWriteError)?;

    let file = WalletInfoFile {
        mk: hex::encode(&info.mk),
        bitcoin_seed: hex::encode(&info.bitcoin_seed),
        sync_key: hex::encode(&info.sync_key),
        archived: info.archived,
        sort_index: info.sort_index,
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&file)?);
    let sealed = envelope::seal_json_string(
        rng,
        &plaintext,
        keys.mk.expose_secret(),
        EncryptionType::Aes256,
    )?;
    store::write_atomic(&dir, &format!("{}.json", info.id), sealed.as_bytes())
}

/// Rewrite `SortIndex` so the records match `order`. Only records whose
/// index actually changes touch disk. Returns the number rewritten.
pub fn reorder<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    order: &[Uuid],
) -> Result<usize> {
    let mut rewritten = 0;
    for (index, id) in order.iter().enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| Error::Generic("wallet order too long".to_owned()))?;
        let mut info = load(keys, id)?;
        if info.sort_index != index {
            info.sort_index = index;
            save(rng, keys, &info)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

fn wallet_dir(keys: &SyncKeys) -> PathBuf {
    keys.sync_dir.join(WALLET_DIR)
}

fn wallet_path(keys: &SyncKeys, id: &Uuid) -> PathBuf {
    wallet_dir(keys).join(format!("{id}.json"))
}

fn decode_hex_field(hex_str: &str) -> Result<Zeroizing<Vec<u8>>> {
    hex::decode(hex_str)
        .map(Zeroizing::new)
        .map_err(|_| Error::JsonError)
}
