//! DAG node schema.
//!
//! File and directory nodes are DAG-CBOR maps with a single key naming the
//! variant:
//!
//! ```text
//! {"file":      {"links":   [{"cid", "size"}]}}           size is cumulative
//! {"directory": {"entries": [{"cid", "name", "size"}]}}
//! {"shard":     {"fanout", "entries": [{"cid", "name", "size"}]}}
//! ```
//!
//! File content leaves are raw blocks and have no schema.

use crate::error::{Error, Result};
use bytes::Bytes;
use cid::Cid;
use ipld_core::codec::Codec;
use serde::{Deserialize, Serialize};
use serde_ipld_dagcbor::codec::DagCborCodec;

/// A child of a file node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLink {
    pub cid: Cid,
    /// Content bytes up to and including this child.
    pub size: u64,
}

/// A named child of a directory or shard node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirLink {
    pub cid: Cid,
    pub name: String,
    /// Content bytes under the child.
    pub size: u64,
}

impl DirLink {
    pub fn new(name: impl Into<String>, cid: Cid, size: u64) -> Self {
        Self {
            cid,
            name: name.into(),
            size,
        }
    }
}

/// Encoded form of an interior DAG node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagNode {
    /// Ordered children whose content concatenates to the file.
    File { links: Vec<FileLink> },
    /// Entries in insertion order, names unique.
    Directory { entries: Vec<DirLink> },
    /// Hash-bucketed directory. Names carry a fixed-width hex bucket prefix.
    Shard { fanout: u64, entries: Vec<DirLink> },
}

impl DagNode {
    /// Serialize to DAG-CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        DagCborCodec::encode_to_vec(self).map_err(|e| Error::encode(e.to_string()))
    }

    /// Parse DAG-CBOR bytes as a node of this schema.
    pub fn decode(cid: &Cid, bytes: &[u8]) -> Result<Self> {
        DagCborCodec::decode_from_slice(bytes)
            .map_err(|e| Error::unsupported_node(*cid, format!("not a file or directory node: {}", e)))
    }

    /// Total content bytes reachable from this node.
    pub fn content_size(&self) -> u64 {
        match self {
            DagNode::File { links } => links.last().map_or(0, |l| l.size),
            DagNode::Directory { entries } | DagNode::Shard { entries, .. } => {
                entries.iter().map(|e| e.size).sum()
            }
        }
    }

    /// CIDs of every child, in stored order.
    pub fn links(&self) -> Vec<Cid> {
        match self {
            DagNode::File { links } => links.iter().map(|l| l.cid).collect(),
            DagNode::Directory { entries } | DagNode::Shard { entries, .. } => {
                entries.iter().map(|e| e.cid).collect()
            }
        }
    }
}

/// A decoded block, as handed to the exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Opaque leaf bytes.
    Raw(Bytes),
    File(Vec<FileLink>),
    Directory(Vec<DirLink>),
    Shard { fanout: u64, entries: Vec<DirLink> },
}

impl From<DagNode> for Node {
    fn from(node: DagNode) -> Self {
        match node {
            DagNode::File { links } => Node::File(links),
            DagNode::Directory { entries } => Node::Directory(entries),
            DagNode::Shard { fanout, entries } => Node::Shard { fanout, entries },
        }
    }
}

/// Width in hex digits of a bucket prefix for `fanout` buckets.
pub fn prefix_width(fanout: u64) -> usize {
    let max = fanout.saturating_sub(1).max(1);
    let bits = 64 - max.leading_zeros() as usize;
    bits.div_ceil(4)
}

/// Uppercase, zero-padded hex label of a bucket.
pub fn bucket_label(bucket: u64, fanout: u64) -> String {
    format!("{:0width$X}", bucket, width = prefix_width(fanout))
}
