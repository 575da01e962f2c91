//! Encoder configuration.
//!
//! These values shape the DAG (leaf size, node fan-out, when directories are
//! sharded) but never affect decoding: the exporter reads whatever shape it
//! finds.

use super::chunker::ChunkerConfig;
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;

/// Reference maximum number of links per file node.
pub const DEFAULT_TREE_WIDTH: usize = 174;

/// Directories with more entries than this are sharded.
pub const DEFAULT_SHARD_THRESHOLD: usize = 1000;

/// Reference number of buckets per shard node.
pub const DEFAULT_SHARD_FANOUT: u64 = 256;

/// Options controlling how input is turned into blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub chunker: ChunkerConfig,
    /// Maximum links per file node.
    pub tree_width: usize,
    /// Largest entry count still encoded as a plain directory node.
    pub shard_threshold: usize,
    /// Buckets per shard node; a power of two.
    pub shard_fanout: u64,
    pub hash: HashAlgorithm,
    /// Wrap a single input file in a directory node.
    pub wrap: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            tree_width: DEFAULT_TREE_WIDTH,
            shard_threshold: DEFAULT_SHARD_THRESHOLD,
            shard_fanout: DEFAULT_SHARD_FANOUT,
            hash: HashAlgorithm::default(),
            wrap: true,
        }
    }
}

impl EncoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    /// Fixed-size chunking with the given leaf size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunker = ChunkerConfig::Fixed { chunk_size };
        self
    }

    pub fn with_tree_width(mut self, tree_width: usize) -> Self {
        self.tree_width = tree_width;
        self
    }

    pub fn with_shard_threshold(mut self, shard_threshold: usize) -> Self {
        self.shard_threshold = shard_threshold;
        self
    }

    pub fn with_shard_fanout(mut self, shard_fanout: u64) -> Self {
        self.shard_fanout = shard_fanout;
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Reject configurations the encoder cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;

        if self.tree_width < 2 {
            return Err(Error::invalid_input(format!(
                "tree width must be at least 2, got {}",
                self.tree_width
            )));
        }
        if self.shard_fanout < 2 || !self.shard_fanout.is_power_of_two() {
            return Err(Error::invalid_input(format!(
                "shard fanout must be a power of two >= 2, got {}",
                self.shard_fanout
            )));
        }
        // blake3 gives 256 bits of bucket index material
        if self.shard_fanout > 1 << 16 {
            return Err(Error::invalid_input(format!(
                "shard fanout must be at most 65536, got {}",
                self.shard_fanout
            )));
        }
        Ok(())
    }

    /// Bits of the name hash consumed per shard level.
    pub(crate) fn shard_bits(&self) -> u32 {
        self.shard_fanout.trailing_zeros()
    }
}
