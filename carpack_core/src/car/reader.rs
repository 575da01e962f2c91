//! Sequential archive reader.

use super::header::CarHeader;
use super::varint;
use crate::block::Block;
use crate::error::{Error, Result};
use cid::Cid;
use std::io::{self, Read};

/// Location of one block frame, as read from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub cid: Cid,
    /// Offset of the block payload from the start of the archive.
    pub data_offset: u64,
    /// Payload length in bytes.
    pub data_len: u64,
}

impl FrameInfo {
    /// Offset just past the payload.
    ///
    /// Frames from [`read_frame_info`] always have an end that fits in a `u64`.
    pub fn end(&self) -> u64 {
        self.data_offset.saturating_add(self.data_len)
    }
}

/// Read the length prefix and CID of the next frame starting at `offset`.
///
/// Leaves the reader positioned at the start of the payload. Returns
/// `Ok(None)` at a clean end of stream.
pub(crate) fn read_frame_info<R: Read>(reader: &mut R, offset: u64) -> Result<Option<FrameInfo>> {
    let (frame_len, prefix_len) = match varint::read(reader)? {
        Some(v) => v,
        None => return Ok(None),
    };

    if frame_len == 0 {
        return Err(Error::invalid_archive(format!(
            "empty block frame at offset {}",
            offset
        )));
    }

    let mut limited = reader.by_ref().take(frame_len);
    let cid = Cid::read_bytes(&mut limited).map_err(|e| {
        Error::invalid_archive(format!("malformed CID in frame at offset {}: {}", offset, e))
    })?;

    let cid_len = cid.to_bytes().len() as u64;
    let data_len = frame_len - cid_len;
    let data_offset = offset
        .checked_add(prefix_len as u64 + cid_len)
        .filter(|start| start.checked_add(data_len).is_some())
        .ok_or_else(|| {
            Error::invalid_archive(format!(
                "block frame at offset {} claims {} bytes, past the addressable end",
                offset, frame_len
            ))
        })?;

    Ok(Some(FrameInfo {
        cid,
        data_offset,
        data_len,
    }))
}

/// Reject a frame whose payload runs past `limit`, the total archive length.
pub(crate) fn check_frame_bounds(info: &FrameInfo, limit: u64) -> Result<()> {
    if info.end() > limit {
        return Err(Error::invalid_archive(format!(
            "block {} claims {} bytes but only {} remain",
            info.cid,
            info.data_len,
            limit.saturating_sub(info.data_offset)
        )));
    }
    Ok(())
}

fn truncated(info: &FrameInfo, read: u64) -> Error {
    Error::invalid_archive(format!(
        "truncated block payload for {}: expected {} bytes, got {}",
        info.cid, info.data_len, read
    ))
}

/// Reads an archive front to back.
///
/// Blocks come out in file order and are not verified here; callers that
/// interpret block bytes verify them first.
pub struct CarReader<R: Read> {
    reader: R,
    header: CarHeader,
    offset: u64,
    finished: bool,
}

impl<R: Read> CarReader<R> {
    /// Read and validate the header.
    pub fn new(mut reader: R) -> Result<Self> {
        let (header, header_len) = CarHeader::read_from(&mut reader)?;
        tracing::debug!(roots = header.roots.len(), "opened archive");
        Ok(Self {
            reader,
            header,
            offset: header_len,
            finished: false,
        })
    }

    /// The decoded header.
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Roots declared in the header.
    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Read the next block, or `None` at the end of the archive.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let Some(info) = self.next_info()? else {
            return Ok(None);
        };

        // Grow the buffer as bytes arrive; the claimed length is untrusted.
        let mut data = Vec::new();
        let read = self
            .reader
            .by_ref()
            .take(info.data_len)
            .read_to_end(&mut data)?;
        if read as u64 != info.data_len {
            return Err(truncated(&info, read as u64));
        }
        self.offset = info.end();

        Ok(Some(Block::new(info.cid, data)))
    }

    /// Read the next frame's CID and skip its payload.
    pub fn next_cid(&mut self) -> Result<Option<FrameInfo>> {
        let Some(info) = self.next_info()? else {
            return Ok(None);
        };

        let skipped = io::copy(
            &mut self.reader.by_ref().take(info.data_len),
            &mut io::sink(),
        )?;
        if skipped != info.data_len {
            return Err(truncated(&info, skipped));
        }
        self.offset = info.end();

        Ok(Some(info))
    }

    fn next_info(&mut self) -> Result<Option<FrameInfo>> {
        if self.finished {
            return Ok(None);
        }
        let info = read_frame_info(&mut self.reader, self.offset)?;
        if info.is_none() {
            self.finished = true;
        }
        Ok(info)
    }

    /// Iterate over every block in file order.
    pub fn blocks(self) -> Blocks<R> {
        Blocks {
            reader: self,
            failed: false,
        }
    }

    /// Iterate over every block's CID in file order without loading payloads.
    pub fn cids(self) -> Cids<R> {
        Cids {
            reader: self,
            failed: false,
        }
    }

    /// Give back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Iterator returned by [`CarReader::blocks`]. Stops after the first error.
pub struct Blocks<R: Read> {
    reader: CarReader<R>,
    failed: bool,
}

impl<R: Read> Iterator for Blocks<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator returned by [`CarReader::cids`]. Stops after the first error.
pub struct Cids<R: Read> {
    reader: CarReader<R>,
    failed: bool,
}

impl<R: Read> Iterator for Cids<R> {
    type Item = Result<FrameInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_cid() {
            Ok(info) => info.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::writer::CarWriter;
    use crate::hash::{HashAlgorithm, codec};

    fn archive(blocks: &[Block], roots: Vec<Cid>) -> Vec<u8> {
        let mut writer = CarWriter::new(Vec::new(), roots).unwrap();
        for block in blocks {
            writer.write_block(block).unwrap();
        }
        writer.finish().unwrap()
    }

    fn raw(data: &[u8]) -> Block {
        Block::encode(data.to_vec(), HashAlgorithm::Sha2_256, codec::RAW)
    }

    #[test]
    fn test_blocks_in_file_order() {
        let blocks = vec![raw(b"one"), raw(b"two"), raw(b"three")];
        let bytes = archive(&blocks, vec![*blocks[2].cid()]);

        let reader = CarReader::new(&bytes[..]).unwrap();
        assert_eq!(reader.roots(), &[*blocks[2].cid()]);

        let read: Vec<Block> = reader.blocks().collect::<Result<_>>().unwrap();
        assert_eq!(read, blocks);
    }

    #[test]
    fn test_cids_skip_payloads() {
        let blocks = vec![raw(&[0u8; 5000]), raw(b"small")];
        let bytes = archive(&blocks, vec![]);

        let infos: Vec<FrameInfo> = CarReader::new(&bytes[..])
            .unwrap()
            .cids()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].cid, *blocks[0].cid());
        assert_eq!(infos[0].data_len, 5000);
        assert_eq!(infos[1].cid, *blocks[1].cid());

        let start = infos[1].data_offset as usize;
        assert_eq!(&bytes[start..start + 5], b"small");
    }

    #[test]
    fn test_empty_archive_has_no_blocks() {
        let bytes = archive(&[], vec![]);
        let reader = CarReader::new(&bytes[..]).unwrap();
        assert!(reader.roots().is_empty());
        assert_eq!(reader.blocks().count(), 0);
    }

    #[test]
    fn test_truncated_block_is_format_error() {
        let bytes = archive(&[raw(b"truncate me please")], vec![]);
        let cut = &bytes[..bytes.len() - 4];

        let results: Vec<Result<Block>> = CarReader::new(cut).unwrap().blocks().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(Error::InvalidArchiveFormat { .. })
        ));
    }

    #[test]
    fn test_garbage_frame_is_format_error() {
        let mut bytes = archive(&[], vec![]);
        bytes.extend_from_slice(&[0x04, 0xff, 0xff, 0xff, 0xff]);

        let mut reader = CarReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next_block(),
            Err(Error::InvalidArchiveFormat { .. })
        ));
    }

    /// A well-formed header followed by one frame whose length prefix claims
    /// `claimed` bytes, then `cid` and `payload`.
    fn frame_claiming(claimed: u64, cid: &Cid, payload: &[u8]) -> Vec<u8> {
        let mut bytes = archive(&[], vec![]);
        varint::encode(claimed, &mut bytes);
        bytes.extend_from_slice(&cid.to_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn assert_format_error(bytes: &[u8]) {
        let mut reader = CarReader::new(bytes).unwrap();
        assert!(matches!(
            reader.next_block(),
            Err(Error::InvalidArchiveFormat { .. })
        ));
        let mut reader = CarReader::new(bytes).unwrap();
        assert!(matches!(
            reader.next_cid(),
            Err(Error::InvalidArchiveFormat { .. })
        ));
    }

    #[test]
    fn test_huge_claimed_length_is_format_error() {
        let block = raw(b"tiny");
        let cid_len = block.cid().to_bytes().len() as u64;

        // Claims ~64 TiB; must fail without allocating it.
        assert_format_error(&frame_claiming(1 << 46, block.cid(), block.bytes()));
        assert_format_error(&frame_claiming(u64::MAX, block.cid(), block.bytes()));
        // One byte more than what follows.
        assert_format_error(&frame_claiming(
            cid_len + block.len() as u64 + 1,
            block.cid(),
            block.bytes(),
        ));
    }

    #[test]
    fn test_reader_does_not_verify() {
        let good = raw(b"original");
        let forged = Block::new(*good.cid(), &b"tampered"[..]);
        let bytes = archive(&[forged.clone()], vec![]);

        let mut reader = CarReader::new(&bytes[..]).unwrap();
        let block = reader.next_block().unwrap().unwrap();
        assert_eq!(block, forged);
        assert!(block.verify().is_err());
    }
}
