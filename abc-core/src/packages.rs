//! The two persisted account packages.
//!
//! The CarePackage is publicly downloadable and carries the client scrypt
//! parameters plus the encrypted recovery questions; anyone may fetch it,
//! since without the password or answers its contents unlock nothing. The
//! LoginPackage is held by the server (and mirrored to disk) and carries
//! the encrypted master-key material.

use abc_crypto::envelope::Envelope;
use abc_crypto::snrp::Snrp;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Publicly retrievable: the client SNRPs and, once recovery is set up,
/// the recovery questions sealed under L4 (`ERQ`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CarePackage {
    #[serde(rename = "SNRP2")]
    pub snrp2: Snrp,
    #[serde(rename = "SNRP3")]
    pub snrp3: Snrp,
    #[serde(rename = "SNRP4")]
    pub snrp4: Snrp,
    #[serde(rename = "ERQ", default, skip_serializing_if = "Option::is_none")]
    pub erq: Option<Envelope>,
}

/// Server-held: the master key wrapped under LP2 (and LRA3 when recovery
/// is set), the sync key sealed under MK, and the server authenticators
/// sealed under MK so a client holding MK can recompute either one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginPackage {
    #[serde(
        rename = "EMK_LP2",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub emk_lp2: Option<Envelope>,
    #[serde(
        rename = "EMK_LRA3",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub emk_lra3: Option<Envelope>,
    #[serde(rename = "ESyncKey")]
    pub esync_key: Envelope,
    #[serde(rename = "ELP1", default, skip_serializing_if = "Option::is_none")]
    pub elp1: Option<Envelope>,
    #[serde(rename = "ELRA1", default, skip_serializing_if = "Option::is_none")]
    pub elra1: Option<Envelope>,
}

impl CarePackage {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self)
            .expect("CarePackage serialization cannot fail")
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::JsonError)
    }
}

impl LoginPackage {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self)
            .expect("LoginPackage serialization cannot fail")
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::JsonError)
    }
}
