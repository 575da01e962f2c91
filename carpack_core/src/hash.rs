//! Content identifiers and block verification.
//!
//! Every block is addressed by a CIDv1: a content-type tag (multicodec) plus a
//! multihash of the block bytes. The same bytes under the same tags always
//! produce the same CID, and verification is a recomputation of the digest.

use crate::error::{Error, Result};
use cid::Cid;
use cid::multihash::Multihash;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;

/// Content-type tags (multicodec codes) known to this crate.
pub mod codec {
    /// Opaque bytes, used for file leaves.
    pub const RAW: u64 = 0x55;
    /// DAG-CBOR, used for file and directory nodes and the archive header.
    pub const DAG_CBOR: u64 = 0x71;
    /// DAG-PB, produced by other tools. Links are followed, nodes are not exported.
    pub const DAG_PB: u64 = 0x70;
    /// A whole CAR archive, used by [`super::hash_archive`].
    pub const CAR: u64 = 0x0202;
}

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// SHA2 with 256-bit output.
    #[default]
    Sha2_256,
    /// SHA2 with 512-bit output.
    Sha2_512,
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl HashAlgorithm {
    /// Returns the string representation of the algorithm (for flags and output).
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha2_256 => "sha2-256",
            HashAlgorithm::Sha2_512 => "sha2-512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha2-256" | "sha256" => Ok(HashAlgorithm::Sha2_256),
            "sha2-512" | "sha512" => Ok(HashAlgorithm::Sha2_512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(Error::invalid_input(format!("Unsupported hash algorithm: {}", s))),
        }
    }

    /// Returns the multihash code of the algorithm.
    pub fn code(&self) -> u64 {
        match self {
            HashAlgorithm::Sha2_256 => 0x12,
            HashAlgorithm::Sha2_512 => 0x13,
            HashAlgorithm::Blake3 => 0x1e,
        }
    }

    /// Parse algorithm from multihash code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x12 => Some(HashAlgorithm::Sha2_256),
            0x13 => Some(HashAlgorithm::Sha2_512),
            0x1e => Some(HashAlgorithm::Blake3),
            _ => None,
        }
    }

    /// Digest raw bytes.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha2_512 => Sha512::digest(data).to_vec(),
            HashAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }

    /// Wrap a digest produced by this algorithm into a multihash.
    fn multihash(&self, digest: &[u8]) -> Multihash<64> {
        Multihash::wrap(self.code(), digest).expect("supported digests fit in 64 bytes")
    }
}

/// Compute the CIDv1 of `bytes` under the given hash algorithm and content type.
pub fn compute_cid(bytes: &[u8], algorithm: HashAlgorithm, codec: u64) -> Cid {
    let digest = algorithm.digest(bytes);
    Cid::new_v1(codec, algorithm.multihash(&digest))
}

/// Check that `bytes` hash to the digest carried by `cid`.
///
/// Returns a `BlockVerificationFailed` error naming the reason otherwise,
/// including when the CID uses a hash function this crate cannot compute.
pub fn check(cid: &Cid, bytes: &[u8]) -> Result<()> {
    let code = cid.hash().code();
    let algorithm = HashAlgorithm::from_code(code).ok_or_else(|| {
        Error::verification_failed(*cid, format!("unsupported hash function 0x{:x}", code))
    })?;

    let computed = algorithm.digest(bytes);
    if computed.as_slice() != cid.hash().digest() {
        return Err(Error::verification_failed(
            *cid,
            format!(
                "digest mismatch: expected {}, got {}",
                hex::encode(cid.hash().digest()),
                hex::encode(&computed)
            ),
        ));
    }

    Ok(())
}

/// Whether `bytes` hash to the digest carried by `cid`.
pub fn verify(cid: &Cid, bytes: &[u8]) -> bool {
    check(cid, bytes).is_ok()
}

/// Parse a CID from its string form (multibase, or base58 for CIDv0).
pub fn parse_cid(s: &str) -> Result<Cid> {
    Cid::try_from(s.trim()).map_err(|e| Error::invalid_cid(format!("{}: {}", s, e)))
}

/// Identify a whole archive: a CAR-tagged CIDv1 over the SHA2-256 of its bytes.
pub fn hash_archive<R: Read>(mut reader: R) -> Result<Cid> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(Cid::new_v1(
        codec::CAR,
        HashAlgorithm::Sha2_256.multihash(&digest),
    ))
}
