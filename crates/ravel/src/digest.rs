//! Content digests.
//!
//! A [`Digest`] is an opaque 256-bit fingerprint with total equality. File
//! digests cover the file's bytes plus its executable bit, so flipping `+x`
//! reruns dependents even when the contents are unchanged. Non-file values
//! (rule inputs, dependency facts) are digested through their
//! [`Encode`](ravel_serialize::Encode) representation.

use std::{fmt, fs, io, io::Read as _, path::Path};

use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;
use sha2::{Digest as _, Sha256};

pub mod cached;

pub use cached::{DigestCache, DigestResult};

/// An opaque content fingerprint.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest of a byte string.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Digest of a string.
    #[must_use]
    pub fn of_string(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Digest of an arbitrary serializable value.
    ///
    /// # Errors
    ///
    /// Fails only when the value itself refuses to encode (e.g. a non-UTF-8
    /// external path).
    pub fn generic<T: Encode + ?Sized>(value: &T) -> io::Result<Self> {
        let bytes = ravel_serialize::to_bytes(value)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Digest of a file's contents plus its executable bit.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors; a missing file is an error here (the
    /// caller decides whether that is expected).
    pub fn file(path: &Path) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let metadata = file.metadata()?;
        let executable = is_executable(&metadata);

        let mut reader = io::BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        hasher.update([u8::from(executable)]);
        Ok(Self(hasher.finalize().into()))
    }

    /// Combines several digests into one.
    #[must_use]
    pub fn combine<I: IntoIterator<Item = Self>>(parts: I) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.0);
        }
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex rendering, used for on-disk names.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 12 hex chars are plenty for log output
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

#[cfg(test)]
mod test;
