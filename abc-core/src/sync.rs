//! The encrypted sync-repo collaborator.
//!
//! The repo exchange itself (a git-like protocol keyed by the hex sync
//! key) lives outside this crate; the core only needs to initialize the
//! local directory and request a sync pass. Everything the core writes
//! into the directory is already sealed under the account master key, so
//! the collaborator never sees plaintext.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

pub trait SyncRepo: Send + Sync {
    /// Prepare a fresh local repo directory for a new account.
    fn init_repo(&self, sync_dir: &Path, sync_key_hex: &str) -> Result<()>;

    /// Exchange state with the remote repo. Returns true when local state
    /// changed ("dirty"), telling the caller to reload what it cached.
    fn sync(&self, sync_dir: &Path, sync_key_hex: &str) -> Result<bool>;
}

/// A local-only stand-in: materializes the directory and never talks to a
/// remote, so a sync pass always reports clean.
pub struct LocalSyncRepo;

impl SyncRepo for LocalSyncRepo {
    fn init_repo(&self, sync_dir: &Path, _sync_key_hex: &str) -> Result<()> {
        fs::create_dir_all(sync_dir).map_err(Error::FileWriteError)
    }

    fn sync(&self, sync_dir: &Path, _sync_key_hex: &str) -> Result<bool> {
        if !sync_dir.exists() {
            return Err(Error::FileDoesNotExist);
        }
        debug!(dir = %sync_dir.display(), "local sync pass");
        Ok(false)
    }
}
