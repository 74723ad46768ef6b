//! The on-disk account store.
//!
//! Layout under the configured root:
//!
//! ```text
//! Accounts[-testnet]/
//!   Account<N>/
//!     UserName.json        {"userName": "<normalized>"}
//!     CarePackage.json
//!     LoginPackage.json
//!     sync/                the encrypted account repo
//! ```
//!
//! Slots are claimed lowest-free-first and never renumbered. Package files
//! are replaced whole: contents land under a temporary name in the slot
//! directory, then rename into place, so readers only ever see a complete
//! file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::username;

/// Maximum number of account slots on one device.
pub const ACCOUNT_MAX: u32 = 1024;

const ACCOUNT_DIR: &str = "Accounts";
const ACCOUNT_DIR_TESTNET: &str = "Accounts-testnet";
const ACCOUNT_PREFIX: &str = "Account";
const SYNC_DIR: &str = "sync";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The per-slot files the store manages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccountFile {
    UserName,
    CarePackage,
    LoginPackage,
}

impl AccountFile {
    fn filename(self) -> &'static str {
        match self {
            Self::UserName => "UserName.json",
            Self::CarePackage => "CarePackage.json",
            Self::LoginPackage => "LoginPackage.json",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct UserNameFile {
    #[serde(rename = "userName")]
    user_name: String,
}

pub struct AccountStore {
    accounts_dir: PathBuf,
}

impl AccountStore {
    pub fn new(root: &Path, testnet: bool) -> Self {
        let dir = if testnet { ACCOUNT_DIR_TESTNET } else { ACCOUNT_DIR };
        Self {
            accounts_dir: root.join(dir),
        }
    }

    /// Find the slot holding `username` (already normalized). Slots whose
    /// `UserName.json` cannot be read or parsed are skipped, not failed:
    /// one damaged account must not lock out the rest.
    pub fn resolve(&self, username: &str) -> Result<Option<u32>> {
        let entries = match fs::read_dir(&self.accounts_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::FileOpenError(err)),
        };

        for entry in entries {
            let entry = entry.map_err(Error::FileReadError)?;
            let name = entry.file_name();
            let Some(slot) = name
                .to_str()
                .and_then(|n| n.strip_prefix(ACCOUNT_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };

            match self.user_for_slot(slot) {
                Ok(Some(existing)) if existing == username =>
                    return Ok(Some(slot)),
                Ok(_) => {}
                Err(err) => {
                    warn!(slot, "skipping unreadable account slot: {err}")
                }
            }
        }
        Ok(None)
    }

    /// Claim the lowest free slot for `username` and write `UserName.json`.
    pub fn allocate(&self, username: &str) -> Result<u32> {
        let slot = self.next_free_slot()?;
        let file = UserNameFile {
            user_name: username.to_owned(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        self.save(slot, AccountFile::UserName, &json)?;
        Ok(slot)
    }

    pub fn exists(&self, slot: u32, file: AccountFile) -> bool {
        self.file_path(slot, file).exists()
    }

    pub fn load(&self, slot: u32, file: AccountFile) -> Result<Vec<u8>> {
        match fs::read(self.file_path(slot, file)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound =>
                Err(Error::FileDoesNotExist),
            Err(err) => Err(Error::FileReadError(err)),
        }
    }

    pub fn save(
        &self,
        slot: u32,
        file: AccountFile,
        data: &[u8],
    ) -> Result<()> {
        let dir = self.slot_dir(slot);
        fs::create_dir_all(&dir).map_err(Error::FileWriteError)?;
        write_atomic(&dir, file.filename(), data)
    }

    /// The slot's sync-repo directory, `Account<N>/sync`.
    pub fn sync_dir(&self, slot: u32) -> PathBuf {
        self.slot_dir(slot).join(SYNC_DIR)
    }

    fn user_for_slot(&self, slot: u32) -> Result<Option<String>> {
        let json = match self.load(slot, AccountFile::UserName) {
            Ok(json) => json,
            Err(Error::FileDoesNotExist) => return Ok(None),
            Err(err) => return Err(err),
        };
        let parsed: UserNameFile = serde_json::from_slice(&json)?;
        Ok(Some(username::normalize(&parsed.user_name)?))
    }

    fn next_free_slot(&self) -> Result<u32> {
        for slot in 0..ACCOUNT_MAX {
            if !self.slot_dir(slot).exists() {
                return Ok(slot);
            }
        }
        Err(Error::NoAvailAccountSpace)
    }

    fn slot_dir(&self, slot: u32) -> PathBuf {
        self.accounts_dir.join(format!("{ACCOUNT_PREFIX}{slot}"))
    }

    fn file_path(&self, slot: u32, file: AccountFile) -> PathBuf {
        self.slot_dir(slot).join(file.filename())
    }
}

/// Write `data` to `dir/filename` atomically: fully write a uniquely-named
/// temp file in the same directory (same filesystem, so the rename cannot
/// degrade to a copy), then rename over the destination.
pub(crate) fn write_atomic(
    dir: &Path,
    filename: &str,
    data: &[u8],
) -> Result<()> {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!(".{filename}.{}.{n}.tmp", process::id()));
    fs::write(&tmp, data).map_err(Error::FileWriteError)?;
    fs::rename(&tmp, dir.join(filename)).map_err(Error::FileWriteError)
}
