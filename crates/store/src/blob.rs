//! Content-addressed blob store.
//!
//! Large run payloads live outside the row log as one file per blob. The
//! address is a single kind byte followed by the sha256 of the payload, hex
//! encoded, so identical payloads share storage and a digest always names
//! exactly one byte sequence.

use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use sha2::{Digest as _, Sha256};

/// Payload kind, encoded as the leading byte of the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlobKind {
    RequestMessages = 0x01,
    ResponseMessages = 0x02,
    ToolTrace = 0x03,
}

pub(crate) struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub(crate) fn open(root: &Path) -> io::Result<Self> {
        let root = root.join("blobs");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write a payload and return its address. Existing blobs are not
    /// rewritten; content addressing makes the write idempotent.
    pub(crate) fn put(&self, kind: BlobKind, payload: &[u8]) -> io::Result<String> {
        let digest = Self::digest(kind, payload);
        let path = self.path_for(&digest);

        if path.exists() {
            return Ok(digest);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write through a temp name so a crash never leaves a half-written
        // blob under its final address.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;

        Ok(digest)
    }

    pub(crate) fn get(&self, digest: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_for(digest))
    }

    fn digest(kind: BlobKind, payload: &[u8]) -> String {
        let hash = Sha256::digest(payload);

        let mut digest = String::with_capacity(2 + hash.len() * 2);
        let _ = write!(digest, "{:02x}", kind as u8);
        for byte in hash {
            let _ = write!(digest, "{byte:02x}");
        }

        digest
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        let shard = digest.get(2..4).unwrap_or("00");
        self.root.join(shard).join(digest)
    }
}
