//! The login-server client.
//!
//! Every endpoint is a JSON POST under a configured base URL. Binary keys
//! travel base64, the repo key travels hex, and the two packages travel as
//! JSON strings. All endpoints answer with the same envelope:
//!
//! ```json
//! { "status_code": 0, "message": "…", "results": { … } }
//! ```
//!
//! This layer does no retries and no disk fallback; the login object
//! decides both. Transport failures are [`Error::ConnectionError`] so the
//! caller can tell "the server said no" from "the server wasn't there".

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Endpoint paths, relative to the configured base URL.
const CREATE_PATH: &str = "account/create";
const ACTIVATE_PATH: &str = "account/activate";
const CHANGE_PASSWORD_PATH: &str = "account/password/update";
const CARE_PACKAGE_GET_PATH: &str = "account/carepackage/get";
const LOGIN_PACKAGE_GET_PATH: &str = "account/loginpackage/get";

/// Which credential authenticates a request that accepts either the
/// password authenticator (LP1) or the recovery authenticator (LRA1).
#[derive(Copy, Clone)]
pub enum ServerAuth<'a> {
    Password(&'a [u8]),
    Recovery(&'a [u8]),
}

/// The account operations the login server exposes. A trait so tests (and
/// alternative deployments) can stand in their own implementation.
pub trait LoginServer: Send + Sync {
    /// Allocate the server-side account row plus the remote repo named by
    /// `repo_key_hex`. The new account stays unusable until
    /// [`LoginServer::activate`].
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &str,
        login_package: &str,
        repo_key_hex: &str,
    ) -> Result<()>;

    /// Mark the account usable after a successful local bootstrap.
    fn activate(&self, l1: &[u8], lp1: &[u8]) -> Result<()>;

    /// Atomically replace the server authenticators and both packages.
    fn change_password(
        &self,
        l1: &[u8],
        auth: ServerAuth<'_>,
        new_lp1: &[u8],
        new_lra1: Option<&[u8]>,
        care_package: &str,
        login_package: &str,
    ) -> Result<()>;

    /// Fetch the CarePackage JSON. Requires no authentication.
    fn get_care_package(&self, l1: &[u8]) -> Result<String>;

    /// Fetch the LoginPackage JSON.
    fn get_login_package(
        &self,
        l1: &[u8],
        auth: ServerAuth<'_>,
    ) -> Result<String>;
}

// --- Wire types --- //

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ServerCode {
    Success,
    GenericError,
    AccountExists,
    NoAccount,
    InvalidPassword,
    InvalidAnswers,
    Unknown(i64),
}

impl ServerCode {
    fn from_wire(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::GenericError,
            2 => Self::AccountExists,
            3 => Self::NoAccount,
            4 => Self::InvalidPassword,
            5 => Self::InvalidAnswers,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    status_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    results: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    /// Map the status code, yielding the `results` member on success.
    fn into_results(self) -> Result<Option<serde_json::Value>> {
        match ServerCode::from_wire(self.status_code) {
            ServerCode::Success => Ok(self.results),
            ServerCode::AccountExists => Err(Error::AccountAlreadyExists),
            ServerCode::NoAccount => Err(Error::AccountDoesNotExist),
            ServerCode::InvalidPassword => Err(Error::BadPassword),
            ServerCode::InvalidAnswers => Err(Error::InvalidAnswers),
            ServerCode::GenericError | ServerCode::Unknown(_) =>
                Err(Error::ServerError(self.message)),
        }
    }
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    l1: String,
    lp1: String,
    care_package: &'a str,
    login_package: &'a str,
    repo_account_key: &'a str,
}

#[derive(Serialize)]
struct AuthRequest {
    l1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lp1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lra1: Option<String>,
}

#[derive(Serialize)]
struct ChangePasswordRequest<'a> {
    l1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lp1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lra1: Option<String>,
    new_lp1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_lra1: Option<String>,
    care_package: &'a str,
    login_package: &'a str,
}

#[derive(Deserialize)]
struct CarePackageResults {
    care_package: String,
}

#[derive(Deserialize)]
struct LoginPackageResults {
    login_package: String,
}

fn auth_fields(auth: ServerAuth<'_>) -> (Option<String>, Option<String>) {
    match auth {
        ServerAuth::Password(lp1) => (Some(BASE64.encode(lp1)), None),
        ServerAuth::Recovery(lra1) => (None, Some(BASE64.encode(lra1))),
    }
}

// --- HTTP implementation --- //

/// The production client: JSON POSTs over HTTPS, with an optional pinned
/// CA bundle replacing the system roots.
pub struct HttpLoginServer {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpLoginServer {
    pub fn new(base_url: &str, ca_path: Option<&Path>) -> Result<Self> {
        let mut builder =
            reqwest::blocking::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(path) = ca_path {
            let pem = std::fs::read(path).map_err(Error::FileReadError)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|_| Error::Generic("unparseable CA bundle".to_owned()))?;
            builder = builder
                .add_root_certificate(cert)
                .tls_built_in_root_certs(false);
        }
        let client = builder.build().map_err(|_| {
            Error::Generic("could not build the HTTP client".to_owned())
        })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ResponseEnvelope> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "posting to login server");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "login server answered outside the envelope");
            return Err(Error::ConnectionError);
        }
        response
            .json::<ResponseEnvelope>()
            .map_err(|_| Error::JsonError)
    }
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::UrlError
    } else {
        Error::ConnectionError
    }
}

impl LoginServer for HttpLoginServer {
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &str,
        login_package: &str,
        repo_key_hex: &str,
    ) -> Result<()> {
        let body = CreateRequest {
            l1: BASE64.encode(l1),
            lp1: BASE64.encode(lp1),
            care_package,
            login_package,
            repo_account_key: repo_key_hex,
        };
        self.post(CREATE_PATH, &body)?.into_results()?;
        Ok(())
    }

    fn activate(&self, l1: &[u8], lp1: &[u8]) -> Result<()> {
        let body = AuthRequest {
            l1: BASE64.encode(l1),
            lp1: Some(BASE64.encode(lp1)),
            lra1: None,
        };
        self.post(ACTIVATE_PATH, &body)?.into_results()?;
        Ok(())
    }

    fn change_password(
        &self,
        l1: &[u8],
        auth: ServerAuth<'_>,
        new_lp1: &[u8],
        new_lra1: Option<&[u8]>,
        care_package: &str,
        login_package: &str,
    ) -> Result<()> {
        let (lp1, lra1) = auth_fields(auth);
        let body = ChangePasswordRequest {
            l1: BASE64.encode(l1),
            lp1,
            lra1,
            new_lp1: BASE64.encode(new_lp1),
            new_lra1: new_lra1.map(|k| BASE64.encode(k)),
            care_package,
            login_package,
        };
        self.post(CHANGE_PASSWORD_PATH, &body)?.into_results()?;
        Ok(())
    }

    fn get_care_package(&self, l1: &[u8]) -> Result<String> {
        let body = AuthRequest {
            l1: BASE64.encode(l1),
            lp1: None,
            lra1: None,
        };
        let results = self
            .post(CARE_PACKAGE_GET_PATH, &body)?
            .into_results()?
            .ok_or(Error::JsonError)?;
        let results: CarePackageResults = serde_json::from_value(results)?;
        Ok(results.care_package)
    }

    fn get_login_package(
        &self,
        l1: &[u8],
        auth: ServerAuth<'_>,
    ) -> Result<String> {
        let (lp1, lra1) = auth_fields(auth);
        let body = AuthRequest {
            l1: BASE64.encode(l1),
            lp1,
            lra1,
        };
        let results = self
            .post(LOGIN_PACKAGE_GET_PATH, &body)?
            .into_results()?
            .ok_or(Error::JsonError)?;
        let results: LoginPackageResults = serde_json::from_value(results)?;
        Ok(results.login_package)
    }
}

// --- In-memory mock --- //

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    struct AccountRow {
        lp1: Vec<u8>,
        lra1: Option<Vec<u8>>,
        care_package: String,
        login_package: String,
        repo_key_hex: String,
        activated: bool,
    }

    #[derive(Default)]
    struct Inner {
        accounts: Mutex<HashMap<Vec<u8>, AccountRow>>,
        offline: AtomicBool,
    }

    /// An in-memory login server honoring the real status-code semantics,
    /// with a switch to simulate an unreachable server. Clones share state.
    #[derive(Clone, Default)]
    pub(crate) struct MockLoginServer {
        inner: Arc<Inner>,
    }

    impl MockLoginServer {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn set_online(&self, online: bool) {
            self.inner.offline.store(!online, Ordering::SeqCst);
        }

        pub(crate) fn repo_key_hex(&self, l1: &[u8]) -> Option<String> {
            let accounts = self.inner.accounts.lock().unwrap();
            accounts.get(l1).map(|row| row.repo_key_hex.clone())
        }

        fn check_online(&self) -> Result<()> {
            if self.inner.offline.load(Ordering::SeqCst) {
                Err(Error::ConnectionError)
            } else {
                Ok(())
            }
        }
    }

    fn check_auth(row: &AccountRow, auth: ServerAuth<'_>) -> Result<()> {
        match auth {
            ServerAuth::Password(lp1) if row.lp1 == lp1 => Ok(()),
            ServerAuth::Password(_) => Err(Error::BadPassword),
            ServerAuth::Recovery(lra1)
                if row.lra1.as_deref() == Some(lra1) =>
                Ok(()),
            ServerAuth::Recovery(_) => Err(Error::InvalidAnswers),
        }
    }

    impl LoginServer for MockLoginServer {
        fn create(
            &self,
            l1: &[u8],
            lp1: &[u8],
            care_package: &str,
            login_package: &str,
            repo_key_hex: &str,
        ) -> Result<()> {
            self.check_online()?;
            let mut accounts = self.inner.accounts.lock().unwrap();
            if accounts.contains_key(l1) {
                return Err(Error::AccountAlreadyExists);
            }
            accounts.insert(
                l1.to_vec(),
                AccountRow {
                    lp1: lp1.to_vec(),
                    lra1: None,
                    care_package: care_package.to_owned(),
                    login_package: login_package.to_owned(),
                    repo_key_hex: repo_key_hex.to_owned(),
                    activated: false,
                },
            );
            Ok(())
        }

        fn activate(&self, l1: &[u8], lp1: &[u8]) -> Result<()> {
            self.check_online()?;
            let mut accounts = self.inner.accounts.lock().unwrap();
            let row = accounts.get_mut(l1).ok_or(Error::AccountDoesNotExist)?;
            check_auth(row, ServerAuth::Password(lp1))?;
            row.activated = true;
            Ok(())
        }

        fn change_password(
            &self,
            l1: &[u8],
            auth: ServerAuth<'_>,
            new_lp1: &[u8],
            new_lra1: Option<&[u8]>,
            care_package: &str,
            login_package: &str,
        ) -> Result<()> {
            self.check_online()?;
            let mut accounts = self.inner.accounts.lock().unwrap();
            let row = accounts.get_mut(l1).ok_or(Error::AccountDoesNotExist)?;
            check_auth(row, auth)?;
            row.lp1 = new_lp1.to_vec();
            if let Some(new_lra1) = new_lra1 {
                row.lra1 = Some(new_lra1.to_vec());
            }
            row.care_package = care_package.to_owned();
            row.login_package = login_package.to_owned();
            Ok(())
        }

        fn get_care_package(&self, l1: &[u8]) -> Result<String> {
            self.check_online()?;
            let accounts = self.inner.accounts.lock().unwrap();
            let row = accounts.get(l1).ok_or(Error::AccountDoesNotExist)?;
            Ok(row.care_package.clone())
        }

        fn get_login_package(
            &self,
            l1: &[u8],
            auth: ServerAuth<'_>,
        ) -> Result<String> {
            self.check_online()?;
            let accounts = self.inner.accounts.lock().unwrap();
            let row = accounts.get(l1).ok_or(Error::AccountDoesNotExist)?;
            if !row.activated {
                return Err(Error::AccountDoesNotExist);
            }
            check_auth(row, auth)?;
            Ok(row.login_package.clone())
        }
    }
}
