//! Content-type dispatch.
//!
//! Interpreting a block depends on the content-type tag in its CID. The
//! registry maps each tag to a decoder and a link extractor; unknown tags are
//! rejected with `UnsupportedNodeType`.

use super::node::{DagNode, Node};
use super::pb::dag_pb_links;
use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::codec;
use cid::Cid;
use ipld_core::codec::Codec;
use ipld_core::ipld::Ipld;
use serde_ipld_dagcbor::codec::DagCborCodec;
use std::collections::HashMap;

/// Decode a block into a node.
pub type DecodeFn = fn(&Block) -> Result<Node>;

/// List every CID a block references.
pub type LinksFn = fn(&Block) -> Result<Vec<Cid>>;

/// Handlers registered for one content-type tag.
#[derive(Clone, Copy)]
pub struct CodecEntry {
    pub name: &'static str,
    pub decode: DecodeFn,
    pub links: LinksFn,
}

/// Lookup table from content-type tag to handlers.
#[derive(Clone)]
pub struct CodecRegistry {
    entries: HashMap<u64, CodecEntry>,
}

impl Default for CodecRegistry {
    /// Raw leaves, DAG-CBOR nodes and DAG-PB links.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            codec::RAW,
            CodecEntry {
                name: "raw",
                decode: decode_raw,
                links: |_| Ok(Vec::new()),
            },
        );
        registry.register(
            codec::DAG_CBOR,
            CodecEntry {
                name: "dag-cbor",
                decode: decode_dag_cbor,
                links: dag_cbor_links,
            },
        );
        registry.register(
            codec::DAG_PB,
            CodecEntry {
                name: "dag-pb",
                decode: |block| {
                    Err(Error::unsupported_node(
                        *block.cid(),
                        "dag-pb nodes can be traversed but not exported",
                    ))
                },
                links: dag_pb_links,
            },
        );
        registry
    }
}

impl CodecRegistry {
    /// A registry with no codecs.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace the handlers for `code`.
    pub fn register(&mut self, code: u64, entry: CodecEntry) {
        self.entries.insert(code, entry);
    }

    /// Handlers for `code`, if registered.
    pub fn get(&self, code: u64) -> Option<&CodecEntry> {
        self.entries.get(&code)
    }

    fn lookup(&self, cid: &Cid) -> Result<&CodecEntry> {
        self.get(cid.codec()).ok_or_else(|| {
            Error::unsupported_node(*cid, format!("unknown content type 0x{:x}", cid.codec()))
        })
    }

    /// Decode a block using the codec named by its CID.
    pub fn decode(&self, block: &Block) -> Result<Node> {
        (self.lookup(block.cid())?.decode)(block)
    }

    /// Extract a block's outbound links using the codec named by its CID.
    pub fn links(&self, block: &Block) -> Result<Vec<Cid>> {
        (self.lookup(block.cid())?.links)(block)
    }
}

fn decode_raw(block: &Block) -> Result<Node> {
    Ok(Node::Raw(block.bytes().clone()))
}

fn decode_dag_cbor(block: &Block) -> Result<Node> {
    DagNode::decode(block.cid(), block.bytes()).map(Node::from)
}

/// Collect every link in any DAG-CBOR value, not only this crate's nodes.
fn dag_cbor_links(block: &Block) -> Result<Vec<Cid>> {
    let value: Ipld = DagCborCodec::decode_from_slice(block.bytes()).map_err(|e| {
        Error::unsupported_node(*block.cid(), format!("malformed dag-cbor: {}", e))
    })?;

    let mut links = Vec::new();
    let mut stack = vec![&value];
    while let Some(item) = stack.pop() {
        match item {
            Ipld::Link(cid) => links.push(*cid),
            // reversed so links come out in document order
            Ipld::List(items) => stack.extend(items.iter().rev()),
            Ipld::Map(map) => stack.extend(map.values().rev()),
            _ => {}
        }
    }
    Ok(links)
}
