//! Content-addressed block storage.
//!
//! Three interchangeable backends implement [`BlockStore`]:
//! - [`MemoryStore`]: an in-process map
//! - [`FsStore`]: one file per block under a directory
//! - [`LogStore`]: a single append-only file with an in-memory offset index
//!
//! Everything downstream (encoder output, exporter input, archive loading) is
//! written against the traits, so backends can be swapped freely.

pub mod fs;
pub mod log;
pub mod memory;

pub use fs::FsStore;
pub use log::LogStore;
pub use memory::MemoryStore;

use crate::block::Block;
use crate::error::Result;
use cid::Cid;

/// Read-only "get block by CID" capability.
///
/// This is all the exporter needs, so archive readers with a random-access
/// index implement it too.
pub trait BlockSource {
    /// Fetch a block, or `None` when the CID is not present.
    ///
    /// Never returns a partially written block.
    fn get(&self, cid: &Cid) -> Result<Option<Block>>;
}

/// Lazy sequence of stored blocks.
pub type BlockIter<'a> = Box<dyn Iterator<Item = Result<Block>> + 'a>;

/// Full block store contract.
///
/// `put` calls with distinct CIDs may be issued concurrently through a shared
/// reference. Putting a CID that is already present leaves the stored bytes
/// unchanged.
pub trait BlockStore: BlockSource + Send + Sync {
    /// Store a block and hand it back.
    fn put(&self, block: Block) -> Result<Block>;

    /// Whether a block with this CID is present.
    fn has(&self, cid: &Cid) -> Result<bool>;

    /// Iterate over every stored block in insertion order.
    ///
    /// The sequence is finite; calling again starts a new pass.
    fn blocks(&self) -> Result<BlockIter<'_>>;

    /// Release backing resources. Calling it more than once is a no-op.
    ///
    /// Temporary stores delete their backing files here; stores opened on a
    /// caller-supplied location keep their data.
    fn close(&self) -> Result<()>;
}

impl<S: BlockSource + ?Sized> BlockSource for &S {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        (**self).get(cid)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        (**self).get(cid)
    }
}
