//! Link extraction for DAG-PB blocks.
//!
//! Only enough protobuf is parsed to find `PBNode.Links[].Hash`:
//!
//! ```text
//! PBNode { Data = 1: bytes, Links = 2: repeated PBLink }
//! PBLink { Hash = 1: bytes, Name = 2: string, Tsize = 3: uint64 }
//! ```
//!
//! Unknown fields are skipped by wire type.

use crate::block::Block;
use crate::error::{Error, Result};
use cid::Cid;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_BYTES: u64 = 2;
const WIRE_FIXED32: u64 = 5;

const NODE_LINKS: u64 = 2;
const LINK_HASH: u64 = 1;

/// A cursor over protobuf fields in a byte slice.
struct Fields<'a> {
    buf: &'a [u8],
}

enum Value<'a> {
    Scalar,
    Bytes(&'a [u8]),
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn varint(&mut self) -> std::result::Result<u64, &'static str> {
        let mut value = 0u64;
        for i in 0..10 {
            let (&byte, rest) = self.buf.split_first().ok_or("truncated varint")?;
            self.buf = rest;
            let low = (byte & 0x7f) as u64;
            if i == 9 && low > 1 {
                return Err("varint overflows u64");
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err("varint longer than 10 bytes")
    }

    fn take(&mut self, len: u64) -> std::result::Result<&'a [u8], &'static str> {
        let len = usize::try_from(len).map_err(|_| "field length out of range")?;
        if len > self.buf.len() {
            return Err("field runs past end of block");
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    /// Next `(field number, value)`, or `None` when the slice is exhausted.
    fn next_field(&mut self) -> std::result::Result<Option<(u64, Value<'a>)>, &'static str> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let key = self.varint()?;
        let value = match key & 0x7 {
            WIRE_VARINT => {
                self.varint()?;
                Value::Scalar
            }
            WIRE_FIXED64 => {
                self.take(8)?;
                Value::Scalar
            }
            WIRE_BYTES => {
                let len = self.varint()?;
                Value::Bytes(self.take(len)?)
            }
            WIRE_FIXED32 => {
                self.take(4)?;
                Value::Scalar
            }
            _ => return Err("unsupported protobuf wire type"),
        };
        Ok(Some((key >> 3, value)))
    }
}

fn parse_links(bytes: &[u8]) -> std::result::Result<Vec<Cid>, String> {
    let mut links = Vec::new();
    let mut node = Fields::new(bytes);
    while let Some((field, value)) = node.next_field()? {
        let (NODE_LINKS, Value::Bytes(link)) = (field, value) else {
            continue;
        };

        let mut hash = None;
        let mut fields = Fields::new(link);
        while let Some((field, value)) = fields.next_field()? {
            if let (LINK_HASH, Value::Bytes(raw)) = (field, value) {
                hash = Some(raw);
            }
        }
        let raw = hash.ok_or("link without a hash")?;
        let cid = Cid::try_from(raw).map_err(|e| format!("malformed link hash: {}", e))?;
        links.push(cid);
    }
    Ok(links)
}

/// Every `Links[].Hash` in a DAG-PB block, in document order.
pub fn dag_pb_links(block: &Block) -> Result<Vec<Cid>> {
    parse_links(block.bytes())
        .map_err(|reason| Error::unsupported_node(*block.cid(), format!("malformed dag-pb: {}", reason)))
}
