//! One-file-per-block directory store.
//!
//! Layout: `{root}/{first two hex digits of the digest}/{cid}`. Writes go
//! through a temporary file in the target directory and are renamed into
//! place, so readers never see a partially written block.

use super::{BlockIter, BlockSource, BlockStore};
use crate::block::Block;
use crate::error::{Error, Result};
use cid::Cid;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// Block store backed by a directory tree.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    order: RwLock<IndexSet<Cid>>,
    temp: Mutex<Option<TempDir>>,
    closed: AtomicBool,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Existing blocks are picked up. The directory belongs to the caller and
    /// is never deleted by [`BlockStore::close`].
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let order = scan_existing(&root)?;
        tracing::debug!(path = %root.display(), blocks = order.len(), "opened fs store");

        Ok(Self {
            root,
            order: RwLock::new(order),
            temp: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a store in a fresh temporary directory, removed on close.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("carpack-blocks-").tempdir()?;
        let root = dir.path().to_path_buf();
        tracing::debug!(path = %root.display(), "created temporary fs store");

        Ok(Self {
            root,
            order: RwLock::new(IndexSet::new()),
            temp: Mutex::new(Some(dir)),
            closed: AtomicBool::new(false),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `cid`.
    ///
    /// Returns: `{root}/{prefix}/{cid}`
    pub fn block_path(&self, cid: &Cid) -> PathBuf {
        let digest = cid.hash().digest();
        let prefix = hex::encode(&digest[..digest.len().min(1)]);
        self.root.join(prefix).join(cid.to_string())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::store_closed(&self.root));
        }
        Ok(())
    }

    /// Write a block atomically using tempfile.
    fn write_block_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_input(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(bytes)?;
        temp_file.flush()?;
        temp_file.persist(path)?;
        Ok(())
    }

    fn read_block(&self, cid: &Cid) -> Result<Option<Block>> {
        match fs::read(self.block_path(cid)) {
            Ok(bytes) => Ok(Some(Block::new(*cid, bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Collect CIDs already present under `root`, in path order.
fn scan_existing(root: &Path) -> Result<IndexSet<Cid>> {
    let mut found = Vec::new();

    for prefix in fs::read_dir(root)? {
        let prefix = prefix?;
        if !prefix.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(prefix.path())? {
            let entry = entry?;
            let name = entry.file_name();
            // Leftover temp files and foreign files are not blocks.
            if let Some(cid) = name.to_str().and_then(|s| Cid::try_from(s).ok()) {
                found.push((entry.path(), cid));
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found.into_iter().map(|(_, cid)| cid).collect())
}

impl BlockSource for FsStore {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        self.ensure_open()?;
        self.read_block(cid)
    }
}

impl BlockStore for FsStore {
    fn put(&self, block: Block) -> Result<Block> {
        self.ensure_open()?;
        let path = self.block_path(block.cid());

        // Deduplication: same CID means same bytes
        if !path.exists() {
            self.write_block_atomic(&path, block.bytes())?;
        }
        self.order.write().insert(*block.cid());
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.block_path(cid).exists())
    }

    fn blocks(&self) -> Result<BlockIter<'_>> {
        self.ensure_open()?;
        let cids: Vec<Cid> = self.order.read().iter().copied().collect();
        Ok(Box::new(cids.into_iter().filter_map(move |cid| {
            match self.read_block(&cid) {
                Ok(Some(block)) => Some(Ok(block)),
                // removed from disk behind our back
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(dir) = self.temp.lock().take() {
            tracing::debug!(path = %self.root.display(), "removing temporary fs store");
            dir.close()?;
        }
        Ok(())
    }
}
