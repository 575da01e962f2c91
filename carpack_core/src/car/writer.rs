//! Streaming archive writer.

use super::header::CarHeader;
use super::varint;
use crate::block::Block;
use crate::error::{Error, Result};
use cid::Cid;
use std::io::{Read, Seek, SeekFrom, Write};

/// Append one `varint(len(cid) + len(bytes)) ++ cid ++ bytes` frame to `buf`.
pub fn encode_frame(cid: &Cid, bytes: &[u8], buf: &mut Vec<u8>) {
    let cid_bytes = cid.to_bytes();
    varint::encode((cid_bytes.len() + bytes.len()) as u64, buf);
    buf.extend_from_slice(&cid_bytes);
    buf.extend_from_slice(bytes);
}

/// Writes a header followed by block frames to any byte sink.
///
/// Each block is written through to the sink as it is supplied, so memory use
/// does not grow with archive size; a slow sink slows the producer down.
/// Wrap unbuffered sinks in a `BufWriter`.
pub struct CarWriter<W: Write> {
    inner: W,
    header_len: u64,
    bytes_written: u64,
    blocks_written: u64,
    last_cid: Option<Cid>,
}

impl<W: Write> CarWriter<W> {
    /// Write the header declaring `roots` and return a writer ready for blocks.
    pub fn new(mut inner: W, roots: Vec<Cid>) -> Result<Self> {
        let header_len = CarHeader::new(roots).write_to(&mut inner)?;
        Ok(Self {
            inner,
            header_len,
            bytes_written: header_len,
            blocks_written: 0,
            last_cid: None,
        })
    }

    /// Append one block frame.
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        let mut frame = Vec::with_capacity(block.len() + 80);
        encode_frame(block.cid(), block.bytes(), &mut frame);
        self.inner.write_all(&frame)?;

        self.bytes_written += frame.len() as u64;
        self.blocks_written += 1;
        self.last_cid = Some(*block.cid());
        Ok(())
    }

    /// CID of the most recently written block.
    ///
    /// For an encoder stream this is the root: parents are always written
    /// after their children.
    pub fn last_cid(&self) -> Option<Cid> {
        self.last_cid
    }

    /// Length of the header region in bytes.
    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Total bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of block frames written so far.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Rewrite the header of an archive in place with new roots.
///
/// Only possible when the new header has exactly the same encoded length as
/// the existing one, which holds when a placeholder root of the same CID shape
/// (version, codec width and hash length) was written up front.
pub fn update_roots<F: Read + Write + Seek>(file: &mut F, roots: Vec<Cid>) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let (_, existing_len) = CarHeader::read_from(file)?;

    let replacement = CarHeader::new(roots).encode()?;
    if replacement.len() as u64 != existing_len {
        return Err(Error::invalid_input(format!(
            "cannot update roots in place: new header is {} bytes, existing header is {} bytes",
            replacement.len(),
            existing_len
        )));
    }

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&replacement)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, codec, compute_cid};
    use std::io::Cursor;

    fn raw(data: &[u8]) -> Block {
        Block::encode(data.to_vec(), HashAlgorithm::Sha2_256, codec::RAW)
    }

    #[test]
    fn test_frame_layout() {
        let block = raw(&[21, 31]);
        let mut frame = Vec::new();
        encode_frame(block.cid(), block.bytes(), &mut frame);

        let cid_len = block.cid().to_bytes().len();
        assert_eq!(frame[0] as usize, cid_len + 2);
        assert_eq!(&frame[1..1 + cid_len], &block.cid().to_bytes()[..]);
        assert_eq!(&frame[1 + cid_len..], &[21, 31]);
    }

    #[test]
    fn test_writer_counts() {
        let a = raw(b"a");
        let b = raw(b"b");
        let mut writer = CarWriter::new(Vec::new(), vec![*b.cid()]).unwrap();
        let header_len = writer.header_len();

        writer.write_block(&a).unwrap();
        writer.write_block(&b).unwrap();
        assert_eq!(writer.blocks_written(), 2);
        assert_eq!(writer.last_cid(), Some(*b.cid()));

        let written = writer.bytes_written();
        let out = writer.finish().unwrap();
        assert_eq!(out.len() as u64, written);
        assert!(written > header_len);
    }

    #[test]
    fn test_update_roots_same_shape() {
        let placeholder = compute_cid(b"", HashAlgorithm::Sha2_256, codec::DAG_CBOR);
        let block = raw(b"real root");

        let mut writer = CarWriter::new(Cursor::new(Vec::new()), vec![placeholder]).unwrap();
        writer.write_block(&block).unwrap();
        let mut file = writer.finish().unwrap();

        update_roots(&mut file, vec![*block.cid()]).unwrap();

        file.set_position(0);
        let (header, _) = CarHeader::read_from(&mut file).unwrap();
        assert_eq!(header.roots, vec![*block.cid()]);
    }

    #[test]
    fn test_update_roots_rejects_length_change() {
        let block = raw(b"x");
        let writer = CarWriter::new(Cursor::new(Vec::new()), vec![]).unwrap();
        let mut file = writer.finish().unwrap();

        let err = update_roots(&mut file, vec![*block.cid()]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }
}
