//! Single-file append-only block store.
//!
//! The log is itself a valid archive: a header with no roots followed by
//! block frames. An in-memory index maps each CID to the offset and length of
//! its payload and is rebuilt by scanning the frames on open.

use super::{BlockIter, BlockSource, BlockStore};
use crate::block::Block;
use crate::car::header::CarHeader;
use crate::car::reader::{check_frame_bounds, read_frame_info};
use crate::car::writer::encode_frame;
use crate::error::{Error, Result};
use cid::Cid;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempPath;

/// Index entry for a block payload
#[derive(Clone, Copy, Debug)]
struct Extent {
    offset: u64,
    len: u64,
}

/// Open file handle plus the current append position.
#[derive(Debug)]
struct LogFile {
    file: File,
    end: u64,
}

/// A content-addressed block store backed by a single append-only file
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    log: Mutex<LogFile>,
    index: RwLock<IndexMap<Cid, Extent>>,
    temp: Mutex<Option<TempPath>>,
    closed: AtomicBool,
}

impl LogStore {
    /// Open an existing log (or any archive file), or create an empty one.
    ///
    /// A trailing frame cut short by an interrupted write is dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let (index, end) = if file.metadata()?.len() == 0 {
            let end = CarHeader::new(vec![]).write_to(&mut file)?;
            file.sync_all()?;
            (IndexMap::new(), end)
        } else {
            rebuild_index(&mut file)?
        };

        tracing::debug!(path = %path.display(), blocks = index.len(), "opened log store");

        Ok(Self {
            path,
            log: Mutex::new(LogFile { file, end }),
            index: RwLock::new(index),
            temp: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a log in a temporary file that is deleted on close.
    pub fn temporary() -> Result<Self> {
        let (mut file, temp_path) = tempfile::Builder::new()
            .prefix("carpack-")
            .suffix(".log")
            .tempfile()?
            .into_parts();

        let end = CarHeader::new(vec![]).write_to(&mut file)?;
        let path = temp_path.to_path_buf();
        tracing::debug!(path = %path.display(), "created temporary log store");

        Ok(Self {
            path,
            log: Mutex::new(LogFile { file, end }),
            index: RwLock::new(IndexMap::new()),
            temp: Mutex::new(Some(temp_path)),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::store_closed(&self.path));
        }
        Ok(())
    }

    fn read_extent(&self, cid: &Cid, extent: Extent) -> Result<Block> {
        let len = usize::try_from(extent.len).map_err(|_| {
            Error::invalid_archive(format!("block {} too large for this platform", cid))
        })?;
        let mut data = vec![0u8; len];
        {
            let mut log = self.log.lock();
            log.file.seek(SeekFrom::Start(extent.offset))?;
            log.file.read_exact(&mut data)?;
        }
        Ok(Block::new(*cid, data))
    }
}

/// Scan every frame after the header, returning the index and append offset.
fn rebuild_index(file: &mut File) -> Result<(IndexMap<Cid, Extent>, u64)> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);

    let (_, header_len) = CarHeader::read_from(&mut reader)?;
    let mut index = IndexMap::new();
    let mut end = header_len;

    loop {
        let info = match read_frame_info(&mut reader, end) {
            Ok(Some(info)) => info,
            Ok(None) => break,
            Err(Error::InvalidArchiveFormat { reason }) => {
                tracing::warn!(offset = end, %reason, "dropping damaged log tail");
                break;
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = check_frame_bounds(&info, file_len) {
            tracing::warn!(offset = end, error = %e, "dropping truncated log tail");
            break;
        }
        let frame_end = info.end();

        // Bounded by file_len above, so the skip fits in an i64.
        let skip = i64::try_from(info.data_len)
            .map_err(|_| Error::invalid_archive("block payload too large to skip"))?;
        reader.seek_relative(skip)?;
        index.entry(info.cid).or_insert(Extent {
            offset: info.data_offset,
            len: info.data_len,
        });
        end = frame_end;
    }

    drop(reader);
    if end < file_len {
        file.set_len(end)?;
    }
    Ok((index, end))
}

impl BlockSource for LogStore {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        self.ensure_open()?;
        let extent = self.index.read().get(cid).copied();
        match extent {
            Some(extent) => self.read_extent(cid, extent).map(Some),
            None => Ok(None),
        }
    }
}

impl BlockStore for LogStore {
    fn put(&self, block: Block) -> Result<Block> {
        self.ensure_open()?;

        // The log lock serializes appends, so the presence check and the
        // index insert cannot interleave with another put.
        let mut log = self.log.lock();
        if self.index.read().contains_key(block.cid()) {
            return Ok(block);
        }

        let mut frame = Vec::with_capacity(block.len() + 80);
        encode_frame(block.cid(), block.bytes(), &mut frame);

        let start = log.end;
        log.file.seek(SeekFrom::Start(start))?;
        log.file.write_all(&frame)?;
        log.end = start + frame.len() as u64;

        // Payload sits at the end of the frame.
        let extent = Extent {
            offset: log.end - block.len() as u64,
            len: block.len() as u64,
        };
        self.index.write().insert(*block.cid(), extent);
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.read().contains_key(cid))
    }

    fn blocks(&self) -> Result<BlockIter<'_>> {
        self.ensure_open()?;
        let entries: Vec<(Cid, Extent)> = self
            .index
            .read()
            .iter()
            .map(|(cid, extent)| (*cid, *extent))
            .collect();
        Ok(Box::new(
            entries
                .into_iter()
                .map(move |(cid, extent)| self.read_extent(&cid, extent)),
        ))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.log.lock().file.flush()?;
        if let Some(temp) = self.temp.lock().take() {
            tracing::debug!(path = %self.path.display(), "removing temporary log store");
            temp.close()?;
        }
        Ok(())
    }
}
