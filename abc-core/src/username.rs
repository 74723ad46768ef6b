//! Username normalization.
//!
//! Account identity is keyed on the normalized form everywhere: key
//! derivation, the on-disk slot scan, and the server identifier all see the
//! same bytes regardless of how the user typed their name.

use crate::error::{Error, Result};

/// Normalize a username to its canonical form: whitespace runs collapse to
/// single spaces, leading/trailing whitespace is stripped, and ASCII
/// letters are lowercased.
///
/// Anything remaining outside printable ASCII (`0x20..=0x7E`) fails with
/// [`Error::NotSupported`].
pub fn normalize(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_ascii_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        for c in word.chars() {
            if c < ' ' || c > '~' {
                return Err(Error::NotSupported);
            }
            out.push(c.to_ascii_lowercase());
        }
    }
    Ok(out)
}
