//! Content-addressed blocks.

use crate::error::Result;
use crate::hash::{self, HashAlgorithm};
use bytes::Bytes;
use cid::Cid;

/// An immutable unit of data addressed by the CID of its bytes.
///
/// Payloads are reference counted, so cloning a block never copies data and
/// stores holding a clone cannot observe mutation.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    /// Pair bytes with the CID they were stored under.
    ///
    /// No verification happens here; blocks read from untrusted sources go
    /// through [`Block::verify`] before their bytes are interpreted.
    pub fn new(cid: Cid, bytes: impl Into<Bytes>) -> Self {
        Self {
            cid,
            bytes: bytes.into(),
        }
    }

    /// Hash `bytes` and build the block addressed by the result.
    pub fn encode(bytes: impl Into<Bytes>, algorithm: HashAlgorithm, codec: u64) -> Self {
        let bytes = bytes.into();
        let cid = hash::compute_cid(&bytes, algorithm, codec);
        Self { cid, bytes }
    }

    /// The block's content identifier.
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The block payload.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Recompute the digest and compare it with the CID.
    pub fn verify(&self) -> Result<()> {
        hash::check(&self.cid, &self.bytes)
    }

    /// Split into CID and payload.
    pub fn into_parts(self) -> (Cid, Bytes) {
        (self.cid, self.bytes)
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("cid", &self.cid.to_string())
            .field("len", &self.bytes.len())
            .finish()
    }
}
