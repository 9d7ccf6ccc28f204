//! Versioned on-disk persistence for engine state.
//!
//! Each persistent database is one file: an 8-byte magic tag, a `u32`
//! version, and the postcard-encoded body. A missing file, a wrong magic, a
//! version mismatch, or a corrupt body all load as "absent": the worst
//! outcome of dropping persisted state is a rebuild, never wrong results,
//! so schema changes just bump the version.

use std::{
    fs,
    io::{self, Read as _, Write as _},
    path::Path,
};

use ravel_serialize::{Decode, Encode, PostcardDecoder, PostcardEncoder};
use tracing::{debug, warn};

/// Loads a versioned database file.
///
/// Returns `None` when the file is missing or unusable; corruption is
/// logged and otherwise treated like absence.
pub fn load<T: Decode>(
    path: &Path,
    magic: &[u8; 8],
    version: u32,
) -> Option<T> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open database");
            return None;
        }
    };

    let mut header = [0u8; 12];
    if let Err(e) = file.read_exact(&mut header) {
        warn!(path = %path.display(), error = %e, "truncated database header");
        return None;
    }
    if &header[..8] != magic {
        warn!(path = %path.display(), "database has wrong magic tag");
        return None;
    }
    let found_version =
        u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
    if found_version != version {
        debug!(
            path = %path.display(),
            found_version,
            expected = version,
            "database version mismatch, ignoring"
        );
        return None;
    }

    let mut decoder = PostcardDecoder::new(io::BufReader::new(file));
    match T::decode(&mut decoder) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt database body");
            None
        }
    }
}

/// Writes a versioned database file atomically (write to a sibling
/// temporary file, then rename over the destination).
///
/// # Errors
///
/// Propagates filesystem errors.
pub fn dump<T: Encode + ?Sized>(
    path: &Path,
    magic: &[u8; 8],
    version: u32,
    value: &T,
) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(magic)?;
        writer.write_all(&version.to_le_bytes())?;

        let mut encoder = PostcardEncoder::new(writer);
        value.encode(&mut encoder)?;
        encoder.into_inner().flush()?;
    }
    fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "dumped database");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    const MAGIC: &[u8; 8] = b"RAVELTST";

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        let mut value = BTreeMap::new();
        value.insert("k".to_owned(), 42u64);

        dump(&path, MAGIC, 3, &value).unwrap();
        let loaded: BTreeMap<String, u64> = load(&path, MAGIC, 3).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<u64> =
            load(&dir.path().join("nope.db"), MAGIC, 1);
        assert!(loaded.is_none());
    }

    #[test]
    fn version_mismatch_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        dump(&path, MAGIC, 1, &7u64).unwrap();
        let loaded: Option<u64> = load(&path, MAGIC, 2);
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_magic_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        dump(&path, b"OTHERMAG", 1, &7u64).unwrap();
        let loaded: Option<u64> = load(&path, MAGIC, 1);
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_body_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0xFF; 2]);
        fs::write(&path, bytes).unwrap();

        let loaded: Option<String> = load(&path, MAGIC, 1);
        assert!(loaded.is_none());
    }
}
