//! Directory node construction, including hash sharding.
//!
//! A directory with more entries than the shard threshold is spread over
//! `fanout` buckets selected by the BLAKE3 hash of each entry name. Each shard
//! level consumes the next `log2(fanout)` bits of the hash, most significant
//! first. A bucket holds one entry; when several names land in the same
//! bucket they move into a nested shard one level down.
//!
//! Stored names carry the bucket label as a prefix (`"0A" + name`); a nested
//! shard is stored under the bare label.

use super::config::EncoderConfig;
use super::node::{DagNode, DirLink, bucket_label};
use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::codec;
use cid::Cid;
use std::collections::BTreeMap;

/// Bucket index of a name hash at shard `depth`.
///
/// Returns `None` once the hash has no bits left for this depth.
pub fn bucket_index(hash: &[u8; 32], depth: u32, bits: u32) -> Option<u64> {
    let start = depth.checked_mul(bits)?;
    if start + bits > 256 {
        return None;
    }

    let mut index = 0u64;
    for k in start..start + bits {
        let byte = hash[(k / 8) as usize];
        let bit = (byte >> (7 - (k % 8))) & 1;
        index = (index << 1) | bit as u64;
    }
    Some(index)
}

/// Encode a directory listing, appending every produced block to `out` in
/// children-before-parent order. Returns the root link of the directory.
pub fn build_directory(
    entries: Vec<DirLink>,
    config: &EncoderConfig,
    out: &mut Vec<Block>,
) -> Result<(Cid, u64)> {
    if entries.len() <= config.shard_threshold {
        let size = entries.iter().map(|e| e.size).sum();
        let block = encode_node(&DagNode::Directory { entries }, config)?;
        let cid = *block.cid();
        out.push(block);
        return Ok((cid, size));
    }

    tracing::debug!(
        entries = entries.len(),
        fanout = config.shard_fanout,
        "sharding directory"
    );
    let hashed = entries
        .into_iter()
        .map(|e| (*blake3::hash(e.name.as_bytes()).as_bytes(), e))
        .collect();
    build_shard(hashed, 0, config, out)
}

fn build_shard(
    entries: Vec<([u8; 32], DirLink)>,
    depth: u32,
    config: &EncoderConfig,
    out: &mut Vec<Block>,
) -> Result<(Cid, u64)> {
    let bits = config.shard_bits();
    let mut buckets: BTreeMap<u64, Vec<([u8; 32], DirLink)>> = BTreeMap::new();
    for (hash, entry) in entries {
        let index = bucket_index(&hash, depth, bits).ok_or_else(|| {
            Error::path_conflict(&entry.name, "name hash collides at every shard level")
        })?;
        buckets.entry(index).or_default().push((hash, entry));
    }

    let mut links = Vec::with_capacity(buckets.len());
    for (index, mut members) in buckets {
        let label = bucket_label(index, config.shard_fanout);
        if members.len() == 1 {
            let (_, entry) = members.remove(0);
            links.push(DirLink::new(format!("{}{}", label, entry.name), entry.cid, entry.size));
        } else {
            let (cid, size) = build_shard(members, depth + 1, config, out)?;
            links.push(DirLink::new(label, cid, size));
        }
    }

    let size = links.iter().map(|l| l.size).sum();
    let node = DagNode::Shard {
        fanout: config.shard_fanout,
        entries: links,
    };
    let block = encode_node(&node, config)?;
    let cid = *block.cid();
    out.push(block);
    Ok((cid, size))
}

fn encode_node(node: &DagNode, config: &EncoderConfig) -> Result<Block> {
    Ok(Block::encode(node.encode()?, config.hash, codec::DAG_CBOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, compute_cid};

    fn entries(n: usize) -> Vec<DirLink> {
        (0..n)
            .map(|i| {
                let name = format!("file-{}.txt", i);
                let cid = compute_cid(name.as_bytes(), HashAlgorithm::Sha2_256, codec::RAW);
                DirLink::new(name, cid, i as u64)
            })
            .collect()
    }

    fn decode(block: &Block) -> DagNode {
        DagNode::decode(block.cid(), block.bytes()).unwrap()
    }

    #[test]
    fn test_bucket_index_bits() {
        let mut hash = [0u8; 32];
        hash[0] = 0b1010_0101;
        hash[1] = 0xff;
        assert_eq!(bucket_index(&hash, 0, 8), Some(0xa5));
        assert_eq!(bucket_index(&hash, 1, 8), Some(0xff));
        assert_eq!(bucket_index(&hash, 0, 4), Some(0xa));
        assert_eq!(bucket_index(&hash, 1, 4), Some(0x5));
        assert_eq!(bucket_index(&hash, 0, 1), Some(1));
        assert_eq!(bucket_index(&hash, 31, 8), Some(0));
        assert_eq!(bucket_index(&hash, 32, 8), None);
    }

    #[test]
    fn test_at_threshold_is_plain_directory() {
        let config = EncoderConfig::new().with_shard_threshold(10);
        let mut out = Vec::new();
        let (cid, size) = build_directory(entries(10), &config, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(*out[0].cid(), cid);
        assert_eq!(size, (0..10).sum::<u64>());
        assert!(matches!(decode(&out[0]), DagNode::Directory { .. }));
    }

    #[test]
    fn test_over_threshold_is_sharded() {
        let config = EncoderConfig::new()
            .with_shard_threshold(10)
            .with_shard_fanout(16);
        let mut out = Vec::new();
        let (cid, size) = build_directory(entries(11), &config, &mut out).unwrap();

        let root = out.last().unwrap();
        assert_eq!(*root.cid(), cid);
        assert_eq!(size, (0..11).sum::<u64>());
        match decode(root) {
            DagNode::Shard { fanout, entries } => {
                assert_eq!(fanout, 16);
                assert!(entries.len() <= 16);
                // every stored name starts with a single hex digit label
                for entry in &entries {
                    let label = &entry.name[..1];
                    assert!(u64::from_str_radix(label, 16).is_ok());
                }
            }
            other => panic!("expected shard, got {:?}", other),
        }
    }

    #[test]
    fn test_collisions_nest() {
        // fanout 2 with 50 names forces nested shards
        let config = EncoderConfig::new()
            .with_shard_threshold(1)
            .with_shard_fanout(2);
        let mut out = Vec::new();
        build_directory(entries(50), &config, &mut out).unwrap();
        assert!(out.len() > 1);

        // children are written before the shard that links them
        let mut seen = std::collections::HashSet::new();
        for block in &out {
            for child in decode(block).links() {
                if child.codec() == codec::DAG_CBOR {
                    assert!(seen.contains(&child));
                }
            }
            seen.insert(*block.cid());
        }
    }

    #[test]
    fn test_sharding_is_deterministic() {
        let config = EncoderConfig::new().with_shard_threshold(5);
        let mut a = Vec::new();
        let mut b = Vec::new();
        let root_a = build_directory(entries(40), &config, &mut a).unwrap();
        let root_b = build_directory(entries(40), &config, &mut b).unwrap();
        assert_eq!(root_a, root_b);
        assert_eq!(a, b);
    }
}
