//! The error taxonomy visible at the account-core boundary.
//!
//! Everything fallible in this crate returns [`Error`]. The variants fall
//! into a few kinds:
//!
//! * User errors (`BadPassword`, `InvalidAnswers`, `AccountAlreadyExists`,
//!   `AccountDoesNotExist`, `NoRecoveryQuestions`) surface as-is.
//! * `DecryptBadChecksum` means "the key was wrong"; login operations remap
//!   it to the matching user error.
//! * Transient errors (`ConnectionError`, `UrlError`) permit falling back
//!   to the on-disk package copies for reads, never for writes.
//! * `File*`, `JsonError`, `DecryptError` and friends are fatal to the
//!   operation that hit them and leave prior state intact.

use std::io;
use std::sync::PoisonError;

use abc_crypto::CryptoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Catch-all for internal failures with no better classification.
    #[error("internal error: {0}")]
    Generic(String),

    #[error("no account slots left on this device")]
    NoAvailAccountSpace,

    #[error("account already exists")]
    AccountAlreadyExists,

    #[error("account does not exist")]
    AccountDoesNotExist,

    #[error("bad password")]
    BadPassword,

    #[error("bad recovery answers")]
    InvalidAnswers,

    #[error("account has no recovery questions")]
    NoRecoveryQuestions,

    /// The username contains characters outside printable ASCII.
    #[error("unsupported username")]
    NotSupported,

    #[error("decrypt error")]
    DecryptError,

    /// Decryption completed but the integrity check failed; the key was
    /// wrong or the data was corrupted.
    #[error("decrypted data failed checksum")]
    DecryptBadChecksum,

    #[error("encrypt error")]
    EncryptError,

    #[error("bad scrypt parameters")]
    ScryptError,

    #[error("malformed JSON")]
    JsonError,

    #[error("could not open file")]
    FileOpenError(#[source] io::Error),

    #[error("could not read file")]
    FileReadError(#[source] io::Error),

    #[error("could not write file")]
    FileWriteError(#[source] io::Error),

    #[error("file does not exist")]
    FileDoesNotExist,

    /// The server rejected the request; carries its message verbatim.
    #[error("server error: {0}")]
    ServerError(String),

    /// The server could not be reached. Retryable by the caller.
    #[error("could not reach the login server")]
    ConnectionError,

    #[error("bad login server URL")]
    UrlError,

    /// A second live core was initialized for the same account root.
    #[error("core already initialized for this root directory")]
    Reinitialization,

    /// The core was terminated before this operation ran.
    #[error("core is not initialized")]
    NotInitialized,

    #[error("account lock poisoned")]
    MutexError,
}

impl Error {
    /// A stable numeric code for each variant, for callers that log or
    /// transport errors numerically.
    pub fn code(&self) -> u32 {
        match self {
            Self::Generic(_) => 1,
            Self::NoAvailAccountSpace => 2,
            Self::AccountAlreadyExists => 3,
            Self::AccountDoesNotExist => 4,
            Self::BadPassword => 5,
            Self::InvalidAnswers => 6,
            Self::NoRecoveryQuestions => 7,
            Self::NotSupported => 8,
            Self::DecryptError => 9,
            Self::DecryptBadChecksum => 10,
            Self::EncryptError => 11,
            Self::ScryptError => 12,
            Self::JsonError => 13,
            Self::FileOpenError(_) => 14,
            Self::FileReadError(_) => 15,
            Self::FileWriteError(_) => 16,
            Self::FileDoesNotExist => 17,
            Self::ServerError(_) => 18,
            Self::ConnectionError => 19,
            Self::UrlError => 20,
            Self::Reinitialization => 21,
            Self::NotInitialized => 22,
            Self::MutexError => 23,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Encrypt => Self::EncryptError,
            CryptoError::Decrypt(_) => Self::DecryptError,
            CryptoError::BadChecksum => Self::DecryptBadChecksum,
            CryptoError::ScryptParams => Self::ScryptError,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Self::JsonError
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Self::MutexError
    }
}
