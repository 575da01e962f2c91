//! Archive header: `varint(len) ++ dag-cbor {roots, version}`.

use super::varint;
use crate::error::{Error, Result};
use cid::Cid;
use ipld_core::codec::Codec;
use serde::{Deserialize, Serialize};
use serde_ipld_dagcbor::codec::DagCborCodec;
use std::io::{Read, Write};

/// The only archive version this crate reads and writes.
pub const CAR_VERSION: u64 = 1;

/// Upper bound for a header payload; anything larger is not a real header.
const MAX_HEADER_LEN: u64 = 32 * 1024 * 1024;

/// Decoded archive header.
///
/// Field order matters: DAG-CBOR sorts map keys by length first, so `roots`
/// precedes `version` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    /// Declared roots; may be empty (infer at read time) or hold several.
    pub roots: Vec<Cid>,
    /// Archive format version.
    pub version: u64,
}

impl CarHeader {
    /// A version 1 header declaring `roots`.
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            roots,
            version: CAR_VERSION,
        }
    }

    /// Encode the header payload (without the length prefix).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        DagCborCodec::encode_to_vec(self).map_err(|e| Error::encode(e.to_string()))
    }

    /// Encode the full header including its varint length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut buf = Vec::with_capacity(payload.len() + varint::MAX_VARINT_LEN);
        varint::encode(payload.len() as u64, &mut buf);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Write the full header, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        Ok(encoded.len() as u64)
    }

    /// Decode a header payload and check its version.
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        let header: CarHeader = DagCborCodec::decode_from_slice(payload)
            .map_err(|e| Error::invalid_archive(format!("malformed header: {}", e)))?;

        if header.version != CAR_VERSION {
            return Err(Error::invalid_archive(format!(
                "unsupported archive version: {} (expected {})",
                header.version, CAR_VERSION
            )));
        }

        Ok(header)
    }

    /// Read a full header from the start of an archive.
    ///
    /// Returns the header and the number of bytes it occupied.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(Self, u64)> {
        let (len, prefix_len) = varint::read(reader)?
            .ok_or_else(|| Error::invalid_archive("empty archive: missing header"))?;

        if len == 0 || len > MAX_HEADER_LEN {
            return Err(Error::invalid_archive(format!(
                "invalid header length: {}",
                len
            )));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::invalid_archive("archive truncated inside header")
            } else {
                e.into()
            }
        })?;

        let header = Self::decode_payload(&payload)?;
        Ok((header, prefix_len as u64 + len))
    }
}
