//! Files at the top level of an account's sync repo: the transaction
//! category list and the account settings. Like everything else in the
//! repo, both are sealed under the account master key, so the sync engine
//! and the server only ever move ciphertext.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use abc_crypto::envelope::{self, EncryptionType};
use abc_crypto::rng::Crng;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::login::SyncKeys;
use crate::store;
use crate::wallet::WALLET_DIR;

const CATEGORIES_FILE: &str = "Categories.json";
const SETTINGS_FILE: &str = "Settings.json";

/// Per-account user preferences, stored in `Settings.json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    #[serde(
        rename = "firstName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub first_name: Option<String>,
    #[serde(
        rename = "lastName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_name: Option<String>,
    #[serde(rename = "nickname", default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Quick-unlock PIN, when the user has set one.
    #[serde(rename = "PIN", default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(rename = "nameOnPayments", default)]
    pub name_on_payments: bool,
    #[serde(rename = "minutesAutoLogout", default = "default_auto_logout")]
    pub minutes_auto_logout: u32,
    #[serde(rename = "language", default = "default_language")]
    pub language: String,
    /// ISO 4217 numeric code of the display currency.
    #[serde(rename = "numCurrency", default = "default_currency")]
    pub currency_num: u32,
    #[serde(rename = "advancedFeatures", default)]
    pub advanced_features: bool,
    #[serde(rename = "bitcoinDenomination", default)]
    pub denomination: BitcoinDenomination,
}

/// How bitcoin amounts are displayed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BitcoinDenomination {
    /// Satoshis per displayed unit.
    #[serde(rename = "satoshi")]
    pub satoshi: u64,
    /// 0 = BTC, 1 = mBTC, 2 = bits.
    #[serde(rename = "labeltype")]
    pub label_type: u8,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            first_name: None,
            last_name: None,
            nickname: None,
            pin: None,
            name_on_payments: false,
            minutes_auto_logout: default_auto_logout(),
            language: default_language(),
            currency_num: default_currency(),
            advanced_features: false,
            denomination: BitcoinDenomination::default(),
        }
    }
}

impl Default for BitcoinDenomination {
    fn default() -> Self {
        // mBTC
        Self {
            satoshi: 100_000,
            label_type: 1,
        }
    }
}

fn default_auto_logout() -> u32 {
    60
}

fn default_language() -> String {
    "en".to_owned()
}

fn default_currency() -> u32 {
    840 // USD
}

#[derive(Serialize, Deserialize)]
struct CategoriesFile {
    categories: Vec<String>,
}

/// Populate a fresh sync repo: an empty category list, default settings,
/// and the wallet-record directory.
pub(crate) fn init_account_files<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
) -> Result<()> {
    fs::create_dir_all(keys.sync_dir.join(WALLET_DIR))
        .map_err(Error::FileWriteError)?;
    categories_save(rng, keys, &[])?;
    settings_save(rng, keys, &AccountSettings::default())
}

/// Load the transaction categories. An account that has never saved any
/// yields an empty list.
pub fn categories_load(keys: &SyncKeys) -> Result<Vec<String>> {
    let file: CategoriesFile = match read_sealed(keys, CATEGORIES_FILE)? {
        Some(plaintext) => serde_json::from_slice(&plaintext)?,
        None => return Ok(Vec::new()),
    };
    Ok(file.categories)
}

/// Append a category to the list.
pub fn categories_add<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    category: &str,
) -> Result<()> {
    let mut categories = categories_load(keys)?;
    categories.push(category.to_owned());
    categories_save(rng, keys, &categories)
}

/// Remove every occurrence of a category from the list.
pub fn categories_remove<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    category: &str,
) -> Result<()> {
    let mut categories = categories_load(keys)?;
    categories.retain(|existing| existing != category);
    categories_save(rng, keys, &categories)
}

fn categories_save<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    categories: &[String],
) -> Result<()> {
    let file = CategoriesFile {
        categories: categories.to_vec(),
    };
    write_sealed(rng, keys, CATEGORIES_FILE, &serde_json::to_vec(&file)?)
}

/// Load the account settings, falling back to defaults when the account
/// has never saved any.
pub fn settings_load(keys: &SyncKeys) -> Result<AccountSettings> {
    match read_sealed(keys, SETTINGS_FILE)? {
        Some(plaintext) => Ok(serde_json::from_slice(&plaintext)?),
        None => Ok(AccountSettings::default()),
    }
}

pub fn settings_save<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    settings: &AccountSettings,
) -> Result<()> {
    write_sealed(rng, keys, SETTINGS_FILE, &serde_json::to_vec(settings)?)
}

fn read_sealed(keys: &SyncKeys, filename: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let sealed = match fs::read_to_string(keys.sync_dir.join(filename)) {
        Ok(sealed) => sealed,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::FileReadError(err)),
    };
    let plaintext =
        envelope::open_json_str(&sealed, keys.mk.expose_secret())?;
    Ok(Some(Zeroizing::new(plaintext)))
}

fn write_sealed<R: Crng>(
    rng: &mut R,
    keys: &SyncKeys,
    filename: &str,
    plaintext: &[u8],
) -> Result<()> {
    ensure_dir(&keys.sync_dir)?;
    let sealed = envelope::seal_json_string(
        rng,
        plaintext,
        keys.mk.expose_secret(),
        EncryptionType::Aes256,
    )?;
    store::write_atomic(&keys.sync_dir, filename, sealed.as_bytes())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(Error::FileWriteError)
}
