//! Error types for carpack_core.

use cid::Cid;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using carpack_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while packing, storing, reading or exporting blocks.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Malformed archive header or frame, or an unsupported archive version.
    #[error("Invalid archive format: {reason}")]
    InvalidArchiveFormat { reason: String },

    /// A referenced block is not present in the block source.
    #[error("Missing block: {cid}")]
    MissingBlock { cid: Cid },

    /// Stored bytes do not hash to the CID they were stored under.
    #[error("Block verification failed for {cid}: {reason}")]
    BlockVerificationFailed { cid: Cid, reason: String },

    /// More than one root candidate and no explicit selection.
    #[error("Multiple roots found, specify which one to use: {}", display_cids(.candidates))]
    AmbiguousRoot { candidates: Vec<Cid> },

    /// No root declared and none could be inferred.
    #[error("No root found: {reason}")]
    NoRoot { reason: String },

    /// A block decoded to something that is not a file, raw leaf or directory.
    #[error("Unsupported node type at {cid}: {reason}")]
    UnsupportedNodeType { cid: Cid, reason: String },

    /// A name is used both as a file and as a directory, or twice in one directory.
    #[error("Path conflict: \"{path}\" {reason}")]
    PathConflict { path: String, reason: String },

    /// Input rejected before any encoding happened.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A CID string or byte sequence could not be parsed.
    #[error("Invalid CID: {reason}")]
    InvalidCid { reason: String },

    /// A node could not be serialized.
    #[error("Encoding failed: {reason}")]
    Encode { reason: String },

    /// The block store has been closed.
    #[error("Block store is closed: {path}")]
    StoreClosed { path: PathBuf },
}

fn display_cids(cids: &[Cid]) -> String {
    cids.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create an InvalidArchiveFormat error.
    pub fn invalid_archive(reason: impl Into<String>) -> Self {
        Error::InvalidArchiveFormat {
            reason: reason.into(),
        }
    }

    /// Create a MissingBlock error.
    pub fn missing_block(cid: Cid) -> Self {
        Error::MissingBlock { cid }
    }

    /// Create a BlockVerificationFailed error.
    pub fn verification_failed(cid: Cid, reason: impl Into<String>) -> Self {
        Error::BlockVerificationFailed {
            cid,
            reason: reason.into(),
        }
    }

    /// Create an AmbiguousRoot error.
    pub fn ambiguous_root(candidates: Vec<Cid>) -> Self {
        Error::AmbiguousRoot { candidates }
    }

    /// Create a NoRoot error.
    pub fn no_root(reason: impl Into<String>) -> Self {
        Error::NoRoot {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedNodeType error.
    pub fn unsupported_node(cid: Cid, reason: impl Into<String>) -> Self {
        Error::UnsupportedNodeType {
            cid,
            reason: reason.into(),
        }
    }

    /// Create a PathConflict error.
    pub fn path_conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create an InvalidCid error.
    pub fn invalid_cid(reason: impl Into<String>) -> Self {
        Error::InvalidCid {
            reason: reason.into(),
        }
    }

    /// Create an Encode error.
    pub fn encode(reason: impl Into<String>) -> Self {
        Error::Encode {
            reason: reason.into(),
        }
    }

    /// Create a StoreClosed error.
    pub fn store_closed(path: impl Into<PathBuf>) -> Self {
        Error::StoreClosed { path: path.into() }
    }

    /// Whether this error ends a listing traversal.
    ///
    /// Missing blocks are reported per entry while listing, so only they are
    /// tolerated; everything else is deterministic and fatal.
    pub fn is_fatal_for_listing(&self) -> bool {
        !matches!(self, Error::MissingBlock { .. })
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<cid::Error> for Error {
    fn from(err: cid::Error) -> Self {
        Error::invalid_cid(err.to_string())
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, codec, compute_cid};

    #[test]
    fn test_ambiguous_root_lists_candidates() {
        let a = compute_cid(b"a", HashAlgorithm::Sha2_256, codec::RAW);
        let b = compute_cid(b"b", HashAlgorithm::Sha2_256, codec::RAW);
        let msg = Error::ambiguous_root(vec![a, b]).to_string();
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains(&b.to_string()));
    }

    #[test]
    fn test_only_missing_block_is_tolerated_while_listing() {
        let cid = compute_cid(b"x", HashAlgorithm::Sha2_256, codec::RAW);
        assert!(!Error::missing_block(cid).is_fatal_for_listing());
        assert!(Error::verification_failed(cid, "digest mismatch").is_fatal_for_listing());
        assert!(Error::invalid_archive("bad header").is_fatal_for_listing());
    }
}
