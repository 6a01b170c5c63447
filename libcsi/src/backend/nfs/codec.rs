//! Volume identifier codec.
//!
//! An NFS volume is identified by its export source, `<host>:<export-path>`.
//! That string is not usable as a single path segment, so the private mount
//! point is named after its RFC 4648 base32 encoding (padded, upper-case
//! alphabet).  Directory names produced by earlier plugin releases use the
//! same encoding and must keep resolving to the same place.

use std::path::{Path, PathBuf};

use data_encoding::BASE32;

use crate::error::CsiError;
use crate::types::VolumeId;

/// Separator between host and export path.
pub const SEPARATOR: char = ':';

/// Encode `(host, export)` into a path-safe token.
///
/// Both fields must be non-empty and free of [`SEPARATOR`], otherwise the
/// token could not be split back unambiguously.
pub fn encode(host: &str, export: &str) -> Result<String, CsiError> {
    check_field(host, export, "host", host)?;
    check_field(host, export, "export path", export)?;
    Ok(encode_raw(&format!("{host}{SEPARATOR}{export}")))
}

/// Decode a token produced by [`encode`] back into `(host, export)`.
pub fn decode(token: &str) -> Result<(String, String), CsiError> {
    let raw = BASE32
        .decode(token.as_bytes())
        .map_err(|e| CsiError::malformed(token, format!("invalid base32: {e}")))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| CsiError::malformed(token, "decoded payload is not UTF-8"))?;
    split(&raw).ok_or_else(|| CsiError::malformed(token, "unable to decode volume ID"))
}

/// Base32 of an arbitrary identifier string.  Total.
pub(crate) fn encode_raw(raw: &str) -> String {
    BASE32.encode(raw.as_bytes())
}

/// Split `host:export` into exactly two non-empty fields.
fn split(raw: &str) -> Option<(String, String)> {
    let mut fields = raw.split(SEPARATOR);
    let host = fields.next()?;
    let export = fields.next()?;
    if fields.next().is_some() || host.is_empty() || export.is_empty() {
        return None;
    }
    Some((host.to_owned(), export.to_owned()))
}

fn check_field(host: &str, export: &str, name: &str, value: &str) -> Result<(), CsiError> {
    let id = || format!("{host}{SEPARATOR}{export}");
    if value.is_empty() {
        return Err(CsiError::malformed(id(), format!("{name} is empty")));
    }
    if value.contains(SEPARATOR) {
        return Err(CsiError::malformed(
            id(),
            format!("{name} contains reserved separator '{SEPARATOR}'"),
        ));
    }
    Ok(())
}

impl VolumeId {
    /// Identifier for the export `export` on `host`.
    pub fn from_export(host: &str, export: &str) -> Result<Self, CsiError> {
        encode(host, export)?;
        Ok(Self(format!("{host}{SEPARATOR}{export}")))
    }

    /// Split the identifier into `(host, export)`.
    pub fn export(&self) -> Result<(String, String), CsiError> {
        split(&self.0).ok_or_else(|| {
            CsiError::malformed(self.0.clone(), "expected exactly one '<host>:<export>' pair")
        })
    }
}

/// The private mount point of `volume_id` under `private_root`.
///
/// Pure and total: the same inputs always give the same path, and every
/// identifier has one.
pub fn private_mount_point(private_root: &Path, volume_id: &VolumeId) -> PathBuf {
    private_root.join(encode_raw(volume_id.as_str()))
}
