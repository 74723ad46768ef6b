//! The ABC account core.
//!
//! Client-side account cryptography for an end-user Bitcoin wallet. A user
//! authenticates against a login server, synchronizes an encrypted data
//! repository, and can recover access via password or recovery answers,
//! all without the server ever seeing a secret.
//!
//! The pieces, bottom up:
//!
//! * [`kd`]: the scrypt derivation graph over the normalized
//!   ([`username`]) identity: the server-visible authenticators and the
//!   client-only key-wrap keys.
//! * [`packages`]: the CarePackage (public: scrypt parameters, encrypted
//!   recovery questions) and the LoginPackage (server-held: the wrapped
//!   master key and sync key).
//! * [`store`]: the on-disk account slots mirroring both packages, so a
//!   device that has logged in once can log in offline.
//! * [`server`]: the login-server wire protocol.
//! * [`login`]: the authenticated principal tying it all together:
//!   create, log in (password or recovery), change password, set recovery,
//!   sync.
//! * [`wallet`] and [`account`]: per-wallet key records, transaction
//!   categories, and settings inside the encrypted sync repo.
//!
//! All of it hangs off an explicit [`Core`] context constructed by
//! [`Core::init`]; there is no process-global state beyond the registry
//! that keeps two cores from sharing one account root.

pub mod account;
pub mod core;
pub mod error;
pub mod kd;
pub mod keys;
pub mod login;
pub mod packages;
pub mod server;
pub mod store;
pub mod sync;
pub mod username;
pub mod wallet;

pub use crate::core::{Core, CoreConfig};
pub use crate::error::Error;
pub use crate::keys::{MasterKey, SyncKey};
pub use crate::login::{Login, SyncKeys};
