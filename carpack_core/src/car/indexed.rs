//! Random-access archive reader.

use super::header::CarHeader;
use super::reader::{check_frame_bounds, read_frame_info};
use crate::block::Block;
use crate::error::{Error, Result};
use crate::store::BlockSource;
use cid::Cid;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Scans a seekable archive once to index every block by CID, then serves
/// `get(cid)` by seeking straight to the payload.
pub struct IndexedCarReader<R: Read + Seek> {
    reader: Mutex<R>,
    header: CarHeader,
    index: IndexMap<Cid, (u64, u64)>,
}

impl IndexedCarReader<BufReader<File>> {
    /// Open and index an archive file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> IndexedCarReader<R> {
    /// Read the header and index every frame.
    ///
    /// Frames for a CID that was already seen are skipped; the first
    /// occurrence wins.
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let (header, header_len) = CarHeader::read_from(&mut reader)?;
        let total_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(header_len))?;

        let mut index = IndexMap::new();
        let mut offset = header_len;
        while let Some(info) = read_frame_info(&mut reader, offset)? {
            check_frame_bounds(&info, total_len)?;
            let end = info.end();

            if index.contains_key(&info.cid) {
                tracing::warn!(cid = %info.cid, "duplicate block in archive");
            } else {
                index.insert(info.cid, (info.data_offset, info.data_len));
            }

            reader.seek(SeekFrom::Start(end))?;
            offset = end;
        }

        tracing::debug!(blocks = index.len(), "indexed archive");
        Ok(Self {
            reader: Mutex::new(reader),
            header,
            index,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Roots declared in the header.
    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Number of distinct blocks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// CIDs in archive order.
    pub fn cids(&self) -> impl Iterator<Item = &Cid> {
        self.index.keys()
    }

    /// Blocks in archive order, read lazily.
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        self.index
            .iter()
            .map(|(cid, &(offset, len))| self.read_at(cid, offset, len))
    }

    fn read_at(&self, cid: &Cid, offset: u64, len: u64) -> Result<Block> {
        let len = usize::try_from(len).map_err(|_| {
            Error::invalid_archive(format!("block {} too large for this platform", cid))
        })?;
        let mut data = vec![0u8; len];
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut data)?;
        Ok(Block::new(*cid, data))
    }
}

impl<R: Read + Seek> BlockSource for IndexedCarReader<R> {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        match self.index.get(cid) {
            Some(&(offset, len)) => self.read_at(cid, offset, len).map(Some),
            None => Ok(None),
        }
    }
}
