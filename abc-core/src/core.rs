//! The core context: configuration, shared collaborators, and the account
//! lock. One [`Core`] per account root; every public operation goes
//! through it.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

use abc_crypto::rng::SeedRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::server::{HttpLoginServer, LoginServer};
use crate::store::AccountStore;
use crate::sync::{LocalSyncRepo, SyncRepo};

/// Static configuration for a [`Core`].
pub struct CoreConfig {
    /// Directory holding the `Accounts` tree.
    pub root_dir: PathBuf,
    /// Base URL of the login server, e.g. `https://auth.example.com/api/v1`.
    pub server_url: String,
    /// Optional PEM bundle; when set, TLS trusts only these roots.
    pub ca_path: Option<PathBuf>,
    /// Keep testnet accounts in a separate `Accounts-testnet` tree.
    pub testnet: bool,
    /// Extra seed material mixed into the process RNG.
    pub seed: Vec<u8>,
}

/// The roots with a live [`Core`], so two contexts can't fight over the
/// same directory tree.
fn active_roots() -> &'static Mutex<BTreeSet<PathBuf>> {
    static ACTIVE_ROOTS: OnceLock<Mutex<BTreeSet<PathBuf>>> = OnceLock::new();
    ACTIVE_ROOTS.get_or_init(|| Mutex::new(BTreeSet::new()))
}

pub struct Core {
    root_dir: PathBuf,
    store: AccountStore,
    server: Box<dyn LoginServer>,
    sync_repo: Box<dyn SyncRepo>,
    rng: Mutex<SeedRng>,
    // The account lock: all public operations serialize on it, covering
    // both the on-disk state and any in-memory view of it.
    account_lock: Mutex<()>,
    state: Mutex<CoreState>,
}

struct CoreState {
    terminated: bool,
}

impl Core {
    /// Build a core talking to the real login server.
    pub fn init(config: CoreConfig) -> Result<Self> {
        let server =
            HttpLoginServer::new(&config.server_url, config.ca_path.as_deref())?;
        Self::init_with(config, Box::new(server), Box::new(LocalSyncRepo))
    }

    /// Build a core with injected collaborators (tests, alternative sync
    /// engines).
    pub fn init_with(
        config: CoreConfig,
        server: Box<dyn LoginServer>,
        sync_repo: Box<dyn SyncRepo>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.root_dir).map_err(Error::FileWriteError)?;
        let root_dir = config
            .root_dir
            .canonicalize()
            .map_err(Error::FileOpenError)?;

        {
            let mut roots = active_roots().lock()?;
            if !roots.insert(root_dir.clone()) {
                return Err(Error::Reinitialization);
            }
        }

        info!(
            root = %root_dir.display(),
            testnet = config.testnet,
            "core initialized"
        );
        Ok(Self {
            store: AccountStore::new(&root_dir, config.testnet),
            server,
            sync_repo,
            rng: Mutex::new(SeedRng::from_material(&config.seed)),
            account_lock: Mutex::new(()),
            state: Mutex::new(CoreState { terminated: false }),
            root_dir,
        })
    }

    /// Shut the context down. Every operation after this fails
    /// [`Error::NotInitialized`]. Dropping the core releases its root for
    /// a later [`Core::init`].
    pub fn terminate(&self) -> Result<()> {
        self.state.lock()?.terminated = true;
        info!(root = %self.root_dir.display(), "core terminated");
        Ok(())
    }

    /// Acquire the account lock, first checking the context is live.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        if self.state.lock()?.terminated {
            return Err(Error::NotInitialized);
        }
        Ok(self.account_lock.lock()?)
    }

    pub(crate) fn rng(&self) -> Result<MutexGuard<'_, SeedRng>> {
        Ok(self.rng.lock()?)
    }

    pub(crate) fn store(&self) -> &AccountStore {
        &self.store
    }

    pub(crate) fn server(&self) -> &dyn LoginServer {
        self.server.as_ref()
    }

    pub(crate) fn sync_repo(&self) -> &dyn SyncRepo {
        self.sync_repo.as_ref()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Ok(mut roots) = active_roots().lock() {
            roots.remove(&self.root_dir);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::mock::MockLoginServer;

    fn config(root_dir: PathBuf) -> CoreConfig {
        CoreConfig {
            root_dir,
            server_url: "https://auth.example.com/api/v1".to_owned(),
            ca_path: None,
            testnet: false,
            seed: vec![1, 2, 3],
        }
    }

    fn mock_core(root_dir: PathBuf) -> Result<Core> {
        Core::init_with(
            config(root_dir),
            Box::new(MockLoginServer::new()),
            Box::new(LocalSyncRepo),
        )
    }

    #[test]
    fn test_one_core_per_root() {
        let dir = tempfile::tempdir().unwrap();

        let core = mock_core(dir.path().to_owned()).unwrap();
        assert!(matches!(
            mock_core(dir.path().to_owned()),
            Err(Error::Reinitialization)
        ));

        // A different root is fine.
        let other = tempfile::tempdir().unwrap();
        let core2 = mock_core(other.path().to_owned()).unwrap();
        drop(core2);

        // Dropping the first core releases its root.
        drop(core);
        mock_core(dir.path().to_owned()).unwrap();
    }

    #[test]
    fn test_terminated_core_refuses_operations() {
        let dir = tempfile::tempdir().unwrap();
        let core = mock_core(dir.path().to_owned()).unwrap();

        core.terminate().unwrap();
        assert!(matches!(
            core.create_account("alice", "hunter2"),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            core.login_password("alice", "hunter2"),
            Err(Error::NotInitialized)
        ));
    }
}
