//! The login object: an authenticated account principal and the public
//! operation surface built around it.
//!
//! Operations orchestrate the key-derivation graph, the account store,
//! and the login-server client. Each one is atomic from the caller's view:
//! either it fully succeeds and disk/server state agree, or it fails and
//! prior state stands. The one exception is a mutation the server accepted
//! but the local disk refused: the operation still errors, the principal
//! is flagged for reconciliation, and the next successful login refetches
//! the authoritative packages from the server.

use std::fmt;
use std::path::PathBuf;

use abc_crypto::envelope::{self, EncryptionType, Envelope};
use abc_crypto::rng::Crng;
use abc_crypto::snrp::Snrp;
use abc_crypto::CryptoError;
use secrecy::{ExposeSecret, Secret};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::account;
use crate::core::Core;
use crate::error::{Error, Result};
use crate::kd;
use crate::keys::{MasterKey, SyncKey};
use crate::packages::{CarePackage, LoginPackage};
use crate::server::ServerAuth;
use crate::store::AccountFile;
use crate::username;

/// Everything the sync collaborator needs to work an account repo.
pub struct SyncKeys {
    pub sync_dir: PathBuf,
    pub mk: MasterKey,
    pub sync_key_hex: String,
}

/// Which credential unwraps the master key out of the LoginPackage.
#[derive(Copy, Clone)]
enum UnlockPath {
    Password,
    Recovery,
}

/// An authenticated account principal.
pub struct Login {
    username: String,
    slot: Option<u32>,

    // Crypto settings:
    snrp1: Snrp,
    snrp2: Snrp,
    snrp3: Snrp,
    snrp4: Snrp,

    // Login server keys:
    l1: [u8; 32],
    lp1: Option<Secret<[u8; 32]>>,
    lra1: Option<Secret<[u8; 32]>>,

    // Recovery questions, sealed under L4:
    erq: Option<Envelope>,

    // Account access:
    mk: MasterKey,
    sync_key: SyncKey,

    // Wrapped master keys, kept verbatim for package rebuilds:
    emk_lp2: Option<Envelope>,
    emk_lra3: Option<Envelope>,

    needs_reconcile: bool,
}

impl Core {
    /// Create a new account, on the server and on this device.
    pub fn create_account(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Login> {
        let _guard = self.lock()?;
        let username = username::normalize(username)?;
        if self.store().resolve(&username)?.is_some() {
            return Err(Error::AccountAlreadyExists);
        }

        let (snrp2, snrp3, snrp4, mk, sync_key) = {
            let mut rng = self.rng()?;
            (
                Snrp::generate_client(&mut *rng),
                Snrp::generate_client(&mut *rng),
                Snrp::generate_client(&mut *rng),
                MasterKey::generate(&mut *rng),
                SyncKey::generate(&mut *rng),
            )
        };

        let snrp1 = Snrp::server();
        let l1 = kd::user_id(&username, &snrp1)?;
        let lp1 = kd::password_auth(&username, password, &snrp1)?;
        let lp2 = kd::password_unlock(&username, password, &snrp2)?;

        let emk_lp2 = {
            let mut rng = self.rng()?;
            envelope::seal(
                &mut *rng,
                mk.expose_secret(),
                lp2.expose_secret(),
                EncryptionType::Aes256,
            )?
        };

        let mut login = Login {
            username,
            slot: None,
            snrp1,
            snrp2,
            snrp3,
            snrp4,
            l1,
            lp1: Some(Secret::new(*lp1.expose_secret())),
            lra1: None,
            erq: None,
            mk,
            sync_key,
            emk_lp2: Some(emk_lp2),
            emk_lra3: None,
            needs_reconcile: false,
        };

        let care_json = login.care_package().to_json_string();
        let login_json = {
            let mut rng = self.rng()?;
            login
                .login_package(
                    &mut *rng,
                    login.emk_lp2.as_ref(),
                    None,
                    login.lp1.as_ref(),
                    None,
                )?
                .to_json_string()
        };

        // The server agrees, or nothing happens locally.
        self.server().create(
            &login.l1,
            lp1.expose_secret(),
            &care_json,
            &login_json,
            &login.sync_key.hex(),
        )?;
        self.server().activate(&login.l1, lp1.expose_secret())?;

        // Server agreed; materialize the local slot.
        self.persist_packages(
            &login.username,
            &mut login.slot,
            &care_json,
            &login_json,
        )?;

        // Populate the sync repo with its initial files.
        let keys = login.sync_keys(self)?;
        self.sync_repo().init_repo(&keys.sync_dir, &keys.sync_key_hex)?;
        {
            let mut rng = self.rng()?;
            account::init_account_files(&mut *rng, &keys)?;
        }

        info!(user = %login.username, slot = login.slot, "created account");
        Ok(login)
    }

    /// Log in with the account password.
    pub fn login_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Login> {
        let _guard = self.lock()?;
        let username = username::normalize(username)?;
        let snrp1 = Snrp::server();
        let l1 = kd::user_id(&username, &snrp1)?;
        let slot = self.store().resolve(&username)?;

        let (care, care_json) = self.fetch_care_package(&l1, slot)?;
        let lp1 = kd::password_auth(&username, password, &snrp1)?;
        let lp2 = kd::password_unlock(&username, password, &care.snrp2)?;

        let (package, login_json) = self.fetch_login_package(
            &l1,
            ServerAuth::Password(lp1.expose_secret()),
            slot,
        )?;

        let mut login = Login::unlock(
            username,
            slot,
            snrp1,
            l1,
            care,
            package,
            UnlockPath::Password,
            &lp2,
            Some(lp1),
        )?;

        // Mirror the authoritative packages to disk so the next login on
        // this device works offline too.
        self.persist_packages(
            &login.username,
            &mut login.slot,
            &care_json,
            &login_json,
        )?;
        info!(user = %login.username, "login via password");
        Ok(login)
    }

    /// Log in with the recovery answers instead of the password.
    pub fn login_recovery(
        &self,
        username: &str,
        answers: &str,
    ) -> Result<Login> {
        let _guard = self.lock()?;
        let username = username::normalize(username)?;
        let snrp1 = Snrp::server();
        let l1 = kd::user_id(&username, &snrp1)?;
        let slot = self.store().resolve(&username)?;

        let (care, care_json) = self.fetch_care_package(&l1, slot)?;
        let lra1 = kd::recovery_auth(&username, answers, &snrp1)?;
        let lra3 = kd::recovery_unlock(&username, answers, &care.snrp3)?;

        let (package, login_json) = self.fetch_login_package(
            &l1,
            ServerAuth::Recovery(lra1.expose_secret()),
            slot,
        )?;

        let mut login = Login::unlock(
            username,
            slot,
            snrp1,
            l1,
            care,
            package,
            UnlockPath::Recovery,
            &lra3,
            Some(lra1),
        )?;

        self.persist_packages(
            &login.username,
            &mut login.slot,
            &care_json,
            &login_json,
        )?;
        info!(user = %login.username, "login via recovery answers");
        Ok(login)
    }

    /// Fetch and decrypt an account's recovery questions. Needs no
    /// credentials: the CarePackage is public and L4 derives from the
    /// username alone.
    pub fn recovery_questions(&self, username: &str) -> Result<String> {
        let _guard = self.lock()?;
        let username = username::normalize(username)?;
        let snrp1 = Snrp::server();
        let l1 = kd::user_id(&username, &snrp1)?;
        let slot = self.store().resolve(&username)?;

        let (care, _care_json) = self.fetch_care_package(&l1, slot)?;
        let erq = care.erq.as_ref().ok_or(Error::NoRecoveryQuestions)?;
        let l4 = kd::questions_key(&username, &care.snrp4)?;

        let questions = envelope::open(erq, l4.expose_secret())?;
        String::from_utf8(questions).map_err(|_| Error::DecryptError)
    }

    /// Server first; fall back to the on-disk copy only when the server is
    /// unreachable. A server that answers authoritatively (wrong password,
    /// no such account) is believed.
    fn fetch_care_package(
        &self,
        l1: &[u8; 32],
        slot: Option<u32>,
    ) -> Result<(CarePackage, String)> {
        let json = match self.server().get_care_package(l1) {
            Ok(json) => json,
            Err(err @ (Error::ConnectionError | Error::UrlError)) => {
                match slot {
                    Some(slot) => {
                        warn!("login server unreachable; reading CarePackage from disk");
                        let bytes =
                            self.store().load(slot, AccountFile::CarePackage)?;
                        String::from_utf8(bytes)
                            .map_err(|_| Error::JsonError)?
                    }
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };
        Ok((CarePackage::from_json_str(&json)?, json))
    }

    fn fetch_login_package(
        &self,
        l1: &[u8; 32],
        auth: ServerAuth<'_>,
        slot: Option<u32>,
    ) -> Result<(LoginPackage, String)> {
        let json = match self.server().get_login_package(l1, auth) {
            Ok(json) => json,
            Err(err @ (Error::ConnectionError | Error::UrlError)) => {
                match slot {
                    Some(slot) => {
                        warn!("login server unreachable; reading LoginPackage from disk");
                        let bytes = self
                            .store()
                            .load(slot, AccountFile::LoginPackage)?;
                        String::from_utf8(bytes)
                            .map_err(|_| Error::JsonError)?
                    }
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };
        Ok((LoginPackage::from_json_str(&json)?, json))
    }

    /// Write both package files into the account's slot, claiming a slot
    /// first if this device has none for the user yet.
    fn persist_packages(
        &self,
        username: &str,
        slot: &mut Option<u32>,
        care_json: &str,
        login_json: &str,
    ) -> Result<()> {
        let slot_num = match *slot {
            Some(slot_num) => slot_num,
            None => {
                let slot_num = self.store().allocate(username)?;
                *slot = Some(slot_num);
                slot_num
            }
        };
        self.store().save(
            slot_num,
            AccountFile::CarePackage,
            care_json.as_bytes(),
        )?;
        self.store().save(
            slot_num,
            AccountFile::LoginPackage,
            login_json.as_bytes(),
        )
    }
}

impl Login {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// True when a mutation reached the server but could not be persisted
    /// locally. The next successful login refetches and repairs.
    pub fn needs_reconcile(&self) -> bool {
        self.needs_reconcile
    }

    /// The keys handed to the sync collaborator.
    pub fn sync_keys(&self, core: &Core) -> Result<SyncKeys> {
        let slot = self.slot.ok_or(Error::FileDoesNotExist)?;
        Ok(SyncKeys {
            sync_dir: core.store().sync_dir(slot),
            mk: self.mk.clone(),
            sync_key_hex: self.sync_key.hex(),
        })
    }

    /// Change the password. The master key never changes; it is rewrapped
    /// under a fresh LP2 (with a rerolled SNRP2), and the server swaps the
    /// authenticator and both packages atomically.
    pub fn set_password(
        &mut self,
        core: &Core,
        new_password: &str,
    ) -> Result<()> {
        let _guard = core.lock()?;

        let snrp2 = {
            let mut rng = core.rng()?;
            Snrp::generate_client(&mut *rng)
        };
        let lp1 = kd::password_auth(&self.username, new_password, &self.snrp1)?;
        let lp2 =
            kd::password_unlock(&self.username, new_password, &snrp2)?;

        // Stage the new material in locals; self stays untouched until the
        // server has accepted.
        let (emk_lp2, care_json, login_json) = {
            let mut rng = core.rng()?;
            let emk_lp2 = envelope::seal(
                &mut *rng,
                self.mk.expose_secret(),
                lp2.expose_secret(),
                EncryptionType::Aes256,
            )?;
            let care = CarePackage {
                snrp2: snrp2.clone(),
                snrp3: self.snrp3.clone(),
                snrp4: self.snrp4.clone(),
                erq: self.erq.clone(),
            };
            let package = self.login_package(
                &mut *rng,
                Some(&emk_lp2),
                self.emk_lra3.as_ref(),
                Some(&lp1),
                self.lra1.as_ref(),
            )?;
            (emk_lp2, care.to_json_string(), package.to_json_string())
        };

        core.server().change_password(
            &self.l1,
            self.server_auth()?,
            lp1.expose_secret(),
            None,
            &care_json,
            &login_json,
        )?;

        // It's official now; commit memory, then disk.
        self.snrp2 = snrp2;
        self.lp1 = Some(lp1);
        self.emk_lp2 = Some(emk_lp2);
        info!(user = %self.username, "password changed");
        self.commit_packages(core, &care_json, &login_json)
    }

    /// Set or replace the recovery questions and answers. Rerolls SNRP3
    /// and SNRP4, wraps the master key under the new LRA3, and seals the
    /// questions under the new L4.
    pub fn set_recovery(
        &mut self,
        core: &Core,
        questions: &str,
        answers: &str,
    ) -> Result<()> {
        let _guard = core.lock()?;

        let (snrp3, snrp4) = {
            let mut rng = core.rng()?;
            (
                Snrp::generate_client(&mut *rng),
                Snrp::generate_client(&mut *rng),
            )
        };
        let l4 = kd::questions_key(&self.username, &snrp4)?;
        let lra1 = kd::recovery_auth(&self.username, answers, &self.snrp1)?;
        let lra3 = kd::recovery_unlock(&self.username, answers, &snrp3)?;

        let (emk_lra3, erq, care_json, login_json) = {
            let mut rng = core.rng()?;
            let emk_lra3 = envelope::seal(
                &mut *rng,
                self.mk.expose_secret(),
                lra3.expose_secret(),
                EncryptionType::Aes256,
            )?;
            let erq = envelope::seal(
                &mut *rng,
                questions.as_bytes(),
                l4.expose_secret(),
                EncryptionType::Aes256,
            )?;
            let care = CarePackage {
                snrp2: self.snrp2.clone(),
                snrp3: snrp3.clone(),
                snrp4: snrp4.clone(),
                erq: Some(erq.clone()),
            };
            let package = self.login_package(
                &mut *rng,
                self.emk_lp2.as_ref(),
                Some(&emk_lra3),
                self.lp1.as_ref(),
                Some(&lra1),
            )?;
            (emk_lra3, erq, care.to_json_string(), package.to_json_string())
        };

        let new_lp1 = self.lp1.as_ref().ok_or_else(|| {
            Error::Generic(
                "cannot set recovery without the password authenticator"
                    .to_owned(),
            )
        })?;
        core.server().change_password(
            &self.l1,
            self.server_auth()?,
            new_lp1.expose_secret(),
            Some(lra1.expose_secret()),
            &care_json,
            &login_json,
        )?;

        self.snrp3 = snrp3;
        self.snrp4 = snrp4;
        self.erq = Some(erq);
        self.lra1 = Some(lra1);
        self.emk_lra3 = Some(emk_lra3);
        info!(user = %self.username, "recovery questions changed");
        self.commit_packages(core, &care_json, &login_json)
    }

    /// Run a sync pass against the remote repo. Returns true when remote
    /// changes landed locally. Claims a local slot first if this principal
    /// has none yet.
    pub fn sync(&mut self, core: &Core) -> Result<bool> {
        let _guard = core.lock()?;

        if self.slot.is_none() {
            let care_json = self.care_package().to_json_string();
            let login_json = {
                let mut rng = core.rng()?;
                self.login_package(
                    &mut *rng,
                    self.emk_lp2.as_ref(),
                    self.emk_lra3.as_ref(),
                    self.lp1.as_ref(),
                    self.lra1.as_ref(),
                )?
                .to_json_string()
            };
            core.persist_packages(
                &self.username,
                &mut self.slot,
                &care_json,
                &login_json,
            )?;
            self.needs_reconcile = false;
        }

        let keys = self.sync_keys(core)?;
        if !keys.sync_dir.exists() {
            core.sync_repo().init_repo(&keys.sync_dir, &keys.sync_key_hex)?;
        }
        core.sync_repo().sync(&keys.sync_dir, &keys.sync_key_hex)
    }

    /// Assemble a principal from fetched packages by unwrapping the master
    /// key with `unlock_key` along `path`.
    #[allow(clippy::too_many_arguments)]
    fn unlock(
        username: String,
        slot: Option<u32>,
        snrp1: Snrp,
        l1: [u8; 32],
        care: CarePackage,
        package: LoginPackage,
        path: UnlockPath,
        unlock_key: &Secret<[u8; 32]>,
        auth: Option<Secret<[u8; 32]>>,
    ) -> Result<Login> {
        let (emk, wrong_key) = match path {
            UnlockPath::Password =>
                (package.emk_lp2.as_ref(), Error::BadPassword),
            UnlockPath::Recovery =>
                (package.emk_lra3.as_ref(), Error::InvalidAnswers),
        };
        let emk = emk.ok_or(Error::DecryptError)?;

        let mk = {
            let plaintext = Zeroizing::new(
                envelope::open(emk, unlock_key.expose_secret()).map_err(
                    |err| match err {
                        CryptoError::BadChecksum => wrong_key,
                        other => Error::from(other),
                    },
                )?,
            );
            MasterKey::try_from_slice(&plaintext)?
        };

        // The sync key travels hex inside its envelope.
        let sync_key = {
            let plaintext = Zeroizing::new(envelope::open(
                &package.esync_key,
                mk.expose_secret(),
            )?);
            let hex_str = std::str::from_utf8(&plaintext)
                .map_err(|_| Error::DecryptError)?;
            SyncKey::from_hex(hex_str)?
        };

        // Recover whichever server authenticator we don't already hold, so
        // this principal can push future package updates for both.
        let (mut lp1, mut lra1) = match path {
            UnlockPath::Password => (auth, None),
            UnlockPath::Recovery => (None, auth),
        };
        if lp1.is_none() {
            if let Some(elp1) = &package.elp1 {
                lp1 = Some(open_key32(elp1, &mk)?);
            }
        }
        if lra1.is_none() {
            if let Some(elra1) = &package.elra1 {
                lra1 = Some(open_key32(elra1, &mk)?);
            }
        }

        Ok(Login {
            username,
            slot,
            snrp1,
            snrp2: care.snrp2,
            snrp3: care.snrp3,
            snrp4: care.snrp4,
            l1,
            lp1,
            lra1,
            erq: care.erq,
            mk,
            sync_key,
            emk_lp2: package.emk_lp2,
            emk_lra3: package.emk_lra3,
            needs_reconcile: false,
        })
    }

    fn care_package(&self) -> CarePackage {
        CarePackage {
            snrp2: self.snrp2.clone(),
            snrp3: self.snrp3.clone(),
            snrp4: self.snrp4.clone(),
            erq: self.erq.clone(),
        }
    }

    /// Build a LoginPackage from explicit parts. The sync key and the
    /// provided authenticators are resealed under MK; the wrapped master
    /// keys are carried verbatim.
    fn login_package<R: Crng>(
        &self,
        rng: &mut R,
        emk_lp2: Option<&Envelope>,
        emk_lra3: Option<&Envelope>,
        lp1: Option<&Secret<[u8; 32]>>,
        lra1: Option<&Secret<[u8; 32]>>,
    ) -> Result<LoginPackage> {
        let esync_key = envelope::seal(
            rng,
            self.sync_key.hex().as_bytes(),
            self.mk.expose_secret(),
            EncryptionType::Aes256,
        )?;
        let elp1 = match lp1 {
            Some(key) => Some(envelope::seal(
                rng,
                key.expose_secret(),
                self.mk.expose_secret(),
                EncryptionType::Aes256,
            )?),
            None => None,
        };
        let elra1 = match lra1 {
            Some(key) => Some(envelope::seal(
                rng,
                key.expose_secret(),
                self.mk.expose_secret(),
                EncryptionType::Aes256,
            )?),
            None => None,
        };
        Ok(LoginPackage {
            emk_lp2: emk_lp2.cloned(),
            emk_lra3: emk_lra3.cloned(),
            esync_key,
            elp1,
            elra1,
        })
    }

    fn server_auth(&self) -> Result<ServerAuth<'_>> {
        if let Some(lp1) = &self.lp1 {
            Ok(ServerAuth::Password(lp1.expose_secret()))
        } else if let Some(lra1) = &self.lra1 {
            Ok(ServerAuth::Recovery(lra1.expose_secret()))
        } else {
            Err(Error::Generic(
                "principal holds no server authenticator".to_owned(),
            ))
        }
    }

    fn commit_packages(
        &mut self,
        core: &Core,
        care_json: &str,
        login_json: &str,
    ) -> Result<()> {
        let result = core.persist_packages(
            &self.username,
            &mut self.slot,
            care_json,
            login_json,
        );
        if result.is_err() {
            // The server took the update but the disk did not. The next
            // successful login overwrites from the server's copy.
            self.needs_reconcile = true;
            warn!(
                user = %self.username,
                "account packages updated on the server but not on disk"
            );
        }
        result
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

fn open_key32(env: &Envelope, mk: &MasterKey) -> Result<Secret<[u8; 32]>> {
    let plaintext =
        Zeroizing::new(envelope::open(env, mk.expose_secret())?);
    let bytes = <[u8; 32]>::try_from(plaintext.as_slice())
        .map_err(|_| Error::DecryptError)?;
    Ok(Secret::new(bytes))
}

#[cfg(test)]
mod test {
    use abc_crypto::rng::SeedRng;

    use super::*;
    use crate::core::CoreConfig;
    use crate::server::mock::MockLoginServer;
    use crate::sync::LocalSyncRepo;
    use crate::wallet;

    struct TestEnv {
        core: Core,
        server: MockLoginServer,
        _root: tempfile::TempDir,
    }

    fn config(root_dir: PathBuf) -> CoreConfig {
        CoreConfig {
            root_dir,
            server_url: "https://auth.example.com/api/v1".to_owned(),
            ca_path: None,
            testnet: false,
            seed: vec![1, 2, 3],
        }
    }

    fn test_env() -> TestEnv {
        abc_logger::init_for_testing();
        let root = tempfile::tempdir().unwrap();
        let server = MockLoginServer::new();
        let core = Core::init_with(
            config(root.path().to_owned()),
            Box::new(server.clone()),
            Box::new(LocalSyncRepo),
        )
        .unwrap();
        TestEnv {
            core,
            server,
            _root: root,
        }
    }

    #[test]
    fn test_create_then_login() {
        let env = test_env();
        let login = env.core.create_account("Alice", "hunter2").unwrap();
        assert_eq!(login.username(), "alice");
        assert!(!login.needs_reconcile());

        // Slot 0 materialized with all three files.
        assert_eq!(env.core.store().resolve("alice").unwrap(), Some(0));
        for file in [
            AccountFile::UserName,
            AccountFile::CarePackage,
            AccountFile::LoginPackage,
        ] {
            assert!(env.core.store().exists(0, file));
        }

        // The server's repo is named by the sync key.
        assert_eq!(
            env.server.repo_key_hex(&login.l1).unwrap(),
            login.sync_key.hex()
        );

        let again = env.core.login_password("alice", "hunter2").unwrap();
        assert_eq!(
            again.mk.expose_secret(),
            login.mk.expose_secret()
        );
        assert_eq!(again.sync_key.hex(), login.sync_key.hex());

        assert!(matches!(
            env.core.login_password("alice", "wrong"),
            Err(Error::BadPassword)
        ));
        assert!(matches!(
            env.core.login_password("nobody", "pw"),
            Err(Error::AccountDoesNotExist)
        ));
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let env = test_env();
        env.core.create_account("alice", "hunter2").unwrap();
        assert!(matches!(
            env.core.create_account(" ALICE ", "other"),
            Err(Error::AccountAlreadyExists)
        ));

        // A different device trips over the server-side check instead.
        let root2 = tempfile::tempdir().unwrap();
        let core2 = Core::init_with(
            config(root2.path().to_owned()),
            Box::new(env.server.clone()),
            Box::new(LocalSyncRepo),
        )
        .unwrap();
        assert!(matches!(
            core2.create_account("alice", "third"),
            Err(Error::AccountAlreadyExists)
        ));
        // And the failed create left nothing behind locally.
        assert_eq!(core2.store().resolve("alice").unwrap(), None);
    }

    #[test]
    fn test_username_normalization_shares_account() {
        let env = test_env();
        env.core.create_account(" Bob  Smith ", "pw").unwrap();

        let login = env.core.login_password("bob smith", "pw").unwrap();
        assert_eq!(login.username(), "bob smith");
        assert_eq!(env.core.store().resolve("bob smith").unwrap(), Some(0));

        // Same slot, not a second account.
        assert_eq!(env.core.store().resolve("bob  smith").unwrap(), Some(0));
        assert!(matches!(
            env.core.create_account("BOB SMITH", "pw"),
            Err(Error::AccountAlreadyExists)
        ));
    }

    #[test]
    fn test_recovery_roundtrip() {
        let env = test_env();
        let mut login = env.core.create_account("Alice", "hunter2").unwrap();

        assert!(matches!(
            env.core.recovery_questions("alice"),
            Err(Error::NoRecoveryQuestions)
        ));
        assert!(matches!(
            env.core.login_recovery("alice", "rex\npizza"),
            Err(Error::InvalidAnswers)
        ));

        login
            .set_recovery(&env.core, "pet?\nfood?", "rex\npizza")
            .unwrap();

        // The questions come back exactly as supplied.
        assert_eq!(
            env.core.recovery_questions("alice").unwrap(),
            "pet?\nfood?"
        );

        let via_recovery =
            env.core.login_recovery("alice", "rex\npizza").unwrap();
        assert_eq!(
            via_recovery.mk.expose_secret(),
            login.mk.expose_secret()
        );
        // The recovery principal recovered the password authenticator from
        // the package, so it could push changes too.
        assert!(via_recovery.lp1.is_some());

        assert!(matches!(
            env.core.login_recovery("alice", "rex\nsushi"),
            Err(Error::InvalidAnswers)
        ));

        // Key-wrap duality: both wraps decrypt to the same master key.
        let lp2 =
            kd::password_unlock("alice", "hunter2", &login.snrp2).unwrap();
        let lra3 =
            kd::recovery_unlock("alice", "rex\npizza", &login.snrp3).unwrap();
        let from_password = envelope::open(
            login.emk_lp2.as_ref().unwrap(),
            lp2.expose_secret(),
        )
        .unwrap();
        let from_recovery = envelope::open(
            login.emk_lra3.as_ref().unwrap(),
            lra3.expose_secret(),
        )
        .unwrap();
        assert_eq!(from_password, from_recovery);
        assert_eq!(from_password.as_slice(), login.mk.expose_secret());
    }

    #[test]
    fn test_set_password_preserves_master_key() {
        let env = test_env();
        let mut login = env.core.create_account("alice", "hunter2").unwrap();
        let mk_before = *login.mk.expose_secret();

        // Park a wallet record in the repo before the change.
        let mut rng = SeedRng::from_u64(31);
        let keys = login.sync_keys(&env.core).unwrap();
        let info = wallet::WalletInfo::generate(&mut rng, 0);
        wallet::save(&mut rng, &keys, &info).unwrap();

        login.set_password(&env.core, "hunter3").unwrap();

        assert!(matches!(
            env.core.login_password("alice", "hunter2"),
            Err(Error::BadPassword)
        ));
        let relogin = env.core.login_password("alice", "hunter3").unwrap();
        assert_eq!(relogin.mk.expose_secret(), &mk_before);

        // The repo contents still decrypt under the same master key.
        let keys = relogin.sync_keys(&env.core).unwrap();
        let loaded = wallet::load(&keys, &info.id).unwrap();
        assert_eq!(loaded.mk.as_slice(), info.mk.as_slice());
    }

    #[test]
    fn test_set_password_after_recovery_login() {
        let env = test_env();
        let mut login = env.core.create_account("alice", "hunter2").unwrap();
        login.set_recovery(&env.core, "pet?", "rex").unwrap();

        // Forgot the password: log in via answers, then set a new one.
        let mut recovered =
            env.core.login_recovery("alice", "rex").unwrap();
        recovered.set_password(&env.core, "hunter4").unwrap();

        env.core.login_password("alice", "hunter4").unwrap();
        assert!(matches!(
            env.core.login_password("alice", "hunter2"),
            Err(Error::BadPassword)
        ));
        // Recovery still works after the password change.
        env.core.login_recovery("alice", "rex").unwrap();
    }

    #[test]
    fn test_offline_fallback() {
        let env = test_env();
        env.core.create_account("alice", "hunter2").unwrap();
        let care_before =
            env.core.store().load(0, AccountFile::CarePackage).unwrap();

        env.server.set_online(false);

        // Reads fall back to the mirrored packages on disk; the wrong-key
        // check still holds offline via the envelope checksum.
        let mut login =
            env.core.login_password("alice", "hunter2").unwrap();
        assert!(matches!(
            env.core.login_password("alice", "wrong"),
            Err(Error::BadPassword)
        ));

        // Writes never fall back, and leave disk state unchanged.
        assert!(matches!(
            env.core.create_account("carol", "pw"),
            Err(Error::ConnectionError)
        ));
        assert_eq!(env.core.store().resolve("carol").unwrap(), None);
        assert!(matches!(
            login.set_password(&env.core, "hunter3"),
            Err(Error::ConnectionError)
        ));
        assert!(matches!(
            login.set_recovery(&env.core, "q?", "a"),
            Err(Error::ConnectionError)
        ));
        assert_eq!(
            env.core.store().load(0, AccountFile::CarePackage).unwrap(),
            care_before
        );

        // The old password survived the failed change.
        env.server.set_online(true);
        env.core.login_password("alice", "hunter2").unwrap();
    }

    #[test]
    fn test_login_on_new_device() {
        let env = test_env();
        env.core.create_account("alice", "hunter2").unwrap();

        // Same server, fresh device root.
        let root2 = tempfile::tempdir().unwrap();
        let core2 = Core::init_with(
            config(root2.path().to_owned()),
            Box::new(env.server.clone()),
            Box::new(LocalSyncRepo),
        )
        .unwrap();

        // Offline and never logged in here: nothing to fall back to.
        env.server.set_online(false);
        assert!(matches!(
            core2.login_password("alice", "hunter2"),
            Err(Error::ConnectionError)
        ));

        // An online login materializes the slot for next time.
        env.server.set_online(true);
        core2.login_password("alice", "hunter2").unwrap();
        assert_eq!(core2.store().resolve("alice").unwrap(), Some(0));

        env.server.set_online(false);
        core2.login_password("alice", "hunter2").unwrap();
    }

    #[test]
    fn test_create_initializes_sync_repo() {
        let env = test_env();
        let mut login = env.core.create_account("alice", "hunter2").unwrap();

        let keys = login.sync_keys(&env.core).unwrap();
        assert!(keys.sync_dir.is_dir());
        assert!(keys.sync_dir.join("Wallets").is_dir());
        assert!(keys.sync_dir.join("Categories.json").is_file());
        assert!(keys.sync_dir.join("Settings.json").is_file());
        assert_eq!(keys.sync_key_hex, login.sync_key.hex());

        // A sync pass over the fresh repo reports clean.
        assert_eq!(login.sync(&env.core).unwrap(), false);
    }

    #[test]
    fn test_concurrent_logins_serialize() {
        let env = test_env();
        env.core.create_account("alice", "hunter2").unwrap();
        env.core.create_account("bob", "hunter2").unwrap();

        // The account lock serializes operations from any thread; nothing
        // here should deadlock, race on slot files, or fail.
        let core = std::sync::Arc::new(env.core);
        let handles: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|user| {
                let core = std::sync::Arc::clone(&core);
                std::thread::spawn(move || {
                    for _ in 0..2 {
                        let login =
                            core.login_password(user, "hunter2").unwrap();
                        assert_eq!(login.username(), user);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(core.store().resolve("alice").unwrap(), Some(0));
        assert_eq!(core.store().resolve("bob").unwrap(), Some(1));
    }

    #[test]
    fn test_password_change_rerolls_snrp2_only() {
        let env = test_env();
        let mut login = env.core.create_account("alice", "hunter2").unwrap();
        let snrp2_before = login.snrp2.clone();
        let snrp3_before = login.snrp3.clone();
        let snrp4_before = login.snrp4.clone();

        login.set_password(&env.core, "hunter3").unwrap();
        assert_ne!(login.snrp2.salt, snrp2_before.salt);
        assert_eq!(login.snrp3, snrp3_before);
        assert_eq!(login.snrp4, snrp4_before);

        // And set_recovery rerolls 3 and 4 but not 2.
        let snrp2_before = login.snrp2.clone();
        login.set_recovery(&env.core, "q?", "a").unwrap();
        assert_eq!(login.snrp2, snrp2_before);
        assert_ne!(login.snrp3.salt, snrp3_before.salt);
        assert_ne!(login.snrp4.salt, snrp4_before.salt);
    }
}
