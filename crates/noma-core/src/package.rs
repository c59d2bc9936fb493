//! Binary package container shared by checkpoints and exported models.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic[8] | version u32 | header_len u64 | header (JSON) | payload_len u64 | payload
//! ```
//!
//! The payload is opaque here; callers store a burn record in it. Lengths are
//! checked on read so a truncated or padded file is reported as malformed.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::persist::atomic_write;

pub const PACKAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// Best-model training checkpoint
    Checkpoint,
    /// Exported inference artifact
    Artifact,
}

impl PackageKind {
    pub fn magic(&self) -> &'static [u8; 8] {
        match self {
            PackageKind::Checkpoint => b"NOMACKPT",
            PackageKind::Artifact => b"NOMAMODL",
        }
    }

    fn error(&self, path: &Path, reason: String) -> Error {
        match self {
            PackageKind::Checkpoint => Error::checkpoint(path, reason),
            PackageKind::Artifact => {
                Error::Export(format!("malformed artifact {}: {reason}", path.display()))
            }
        }
    }
}

/// Encode a package into memory.
pub fn encode_package<H: Serialize>(
    kind: PackageKind,
    header: &H,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(header)?;
    let mut bytes = Vec::with_capacity(8 + 4 + 8 + header.len() + 8 + payload.len());
    bytes.extend_from_slice(kind.magic());
    bytes.extend_from_slice(&PACKAGE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Decode a package, returning the header and a borrow of the payload.
pub fn decode_package<H: DeserializeOwned>(
    kind: PackageKind,
    bytes: &[u8],
) -> std::result::Result<(H, &[u8]), String> {
    let mut cursor = bytes;

    let magic = take(&mut cursor, 8, "magic")?;
    if magic != kind.magic() {
        return Err(format!(
            "unexpected magic {:?}, expected {:?}",
            String::from_utf8_lossy(magic),
            String::from_utf8_lossy(kind.magic())
        ));
    }

    let version = u32::from_le_bytes(fixed(take(&mut cursor, 4, "version")?));
    if version != PACKAGE_VERSION {
        return Err(format!("unsupported package version {version}"));
    }

    let header_len = read_len(&mut cursor, "header length")?;
    let header_bytes = take(&mut cursor, header_len, "header")?;
    let header: H =
        serde_json::from_slice(header_bytes).map_err(|e| format!("invalid header: {e}"))?;

    let payload_len = read_len(&mut cursor, "payload length")?;
    let payload = take(&mut cursor, payload_len, "payload")?;
    if !cursor.is_empty() {
        return Err(format!("{} unexpected trailing bytes", cursor.len()));
    }

    Ok((header, payload))
}

/// Atomically write a package to `path`.
pub fn write_package<H: Serialize>(
    path: &Path,
    kind: PackageKind,
    header: &H,
    payload: &[u8],
) -> Result<()> {
    let bytes = encode_package(kind, header, payload)?;
    atomic_write(path, |writer| Ok(writer.write_all(&bytes)?))
}

/// Read a package from `path`. Missing, unreadable and malformed files all
/// produce the error variant belonging to `kind`.
pub fn read_package<H: DeserializeOwned>(path: &Path, kind: PackageKind) -> Result<(H, Vec<u8>)> {
    let bytes = fs::read(path).map_err(|e| kind.error(path, format!("cannot read file: {e}")))?;
    let (header, payload) =
        decode_package::<H>(kind, &bytes).map_err(|reason| kind.error(path, reason))?;
    Ok((header, payload.to_vec()))
}

fn take<'a>(cursor: &mut &'a [u8], n: usize, what: &str) -> std::result::Result<&'a [u8], String> {
    if cursor.len() < n {
        return Err(format!(
            "truncated while reading {what} (need {n} bytes, {} left)",
            cursor.len()
        ));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn read_len(cursor: &mut &[u8], what: &str) -> std::result::Result<usize, String> {
    let raw = u64::from_le_bytes(fixed(take(cursor, 8, what)?));
    usize::try_from(raw).map_err(|_| format!("{what} {raw} does not fit in memory"))
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
