//! Packing inputs into archives and stores.

use crate::block::Block;
use crate::car::{CarWriter, update_roots};
use crate::dag::{DagEncoder, EncoderConfig, FileInput};
use crate::error::{Error, Result};
use crate::hash::{codec, compute_cid};
use crate::store::BlockStore;
use cid::Cid;
use std::collections::HashSet;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// What to pack.
pub enum PackInput {
    /// Named files and directories.
    Files(Vec<FileInput>),
    /// One unnamed byte stream, encoded as a bare file.
    Stream(Box<dyn Read + Send>),
}

impl PackInput {
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        PackInput::Stream(Box::new(reader))
    }
}

impl From<Vec<FileInput>> for PackInput {
    fn from(files: Vec<FileInput>) -> Self {
        PackInput::Files(files)
    }
}

/// Outcome of a pack operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub root: Cid,
    /// Content bytes under the root.
    pub size: u64,
    /// Distinct blocks written.
    pub blocks: u64,
    /// Archive bytes written, header included.
    pub bytes: u64,
}

/// Encodes inputs with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Packer {
    config: EncoderConfig,
}

impl Packer {
    /// Create a packer, rejecting an invalid configuration up front.
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Lazy block stream for `input`, children before parents.
    pub fn blocks(&self, input: impl Into<PackInput>) -> Result<DagEncoder> {
        match input.into() {
            PackInput::Files(files) => DagEncoder::new(files, &self.config),
            PackInput::Stream(reader) => DagEncoder::from_reader(reader, &self.config),
        }
    }

    /// Stream an archive to a sink that cannot seek.
    ///
    /// The root is not known until the last block, so the header declares no
    /// roots and readers infer it. Returns the summary and the sink.
    pub fn pack_to_writer<W: Write>(
        &self,
        input: impl Into<PackInput>,
        writer: W,
    ) -> Result<(PackSummary, W)> {
        let encoder = self.blocks(input)?;
        let car = CarWriter::new(writer, Vec::new())?;
        let (summary, car) = stream_blocks(encoder, car)?;
        Ok((summary, car.finish()?))
    }

    /// Write an archive file declaring its root.
    ///
    /// The archive is written to a temporary file next to `path` with a
    /// placeholder root of the same shape, the header is patched once the
    /// real root is known, and the file is then renamed into place. On any
    /// error the temporary file is removed and `path` is left untouched.
    pub fn pack_to_file(&self, input: impl Into<PackInput>, path: &Path) -> Result<PackSummary> {
        let encoder = self.blocks(input)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = tempfile::Builder::new()
            .prefix(".carpack-")
            .suffix(".car.tmp")
            .tempfile_in(dir)?;

        let placeholder = compute_cid(b"", self.config.hash, codec::DAG_CBOR);
        let summary = {
            let car = CarWriter::new(BufWriter::new(temp.as_file_mut()), vec![placeholder])?;
            let (summary, car) = stream_blocks(encoder, car)?;
            car.finish()?;
            summary
        };

        update_roots(temp.as_file_mut(), vec![summary.root])?;
        temp.as_file().sync_all()?;
        temp.persist(path)?;

        tracing::debug!(
            path = %path.display(),
            root = %summary.root,
            blocks = summary.blocks,
            bytes = summary.bytes,
            "archive written"
        );
        Ok(summary)
    }

    /// Put every encoded block into `store` and return the root and size.
    pub fn pack_into_store<S: BlockStore + ?Sized>(
        &self,
        input: impl Into<PackInput>,
        store: &S,
    ) -> Result<(Cid, u64)> {
        let mut encoder = self.blocks(input)?;
        let mut count = 0u64;
        for block in &mut encoder {
            store.put(block?)?;
            count += 1;
        }
        let root = finished_root(&encoder)?;
        tracing::debug!(root = %root.0, blocks = count, "packed into store");
        Ok(root)
    }
}

fn finished_root(encoder: &DagEncoder) -> Result<(Cid, u64)> {
    encoder
        .root()
        .ok_or_else(|| Error::encode("encoder finished without producing a root"))
}

/// Write every block of `encoder`, skipping CIDs already written.
fn stream_blocks<W: Write>(
    mut encoder: DagEncoder,
    mut car: CarWriter<W>,
) -> Result<(PackSummary, CarWriter<W>)> {
    let mut seen: HashSet<Cid> = HashSet::new();
    for block in &mut encoder {
        let block: Block = block?;
        if seen.insert(*block.cid()) {
            car.write_block(&block)?;
        } else {
            tracing::trace!(cid = %block.cid(), "skipping duplicate block");
        }
    }

    let (root, size) = finished_root(&encoder)?;
    debug_assert_eq!(car.last_cid(), Some(root));

    let summary = PackSummary {
        root,
        size,
        blocks: car.blocks_written(),
        bytes: car.bytes_written(),
    };
    Ok((summary, car))
}

/// Serialize every block of `store` into an archive declaring `roots`.
pub fn write_archive_from_store<S, W>(store: &S, roots: Vec<Cid>, writer: W) -> Result<W>
where
    S: BlockStore + ?Sized,
    W: Write,
{
    let mut car = CarWriter::new(writer, roots)?;
    for block in store.blocks()? {
        car.write_block(&block?)?;
    }
    tracing::debug!(blocks = car.blocks_written(), "archive written from store");
    car.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::{CarHeader, CarReader, IndexedCarReader};
    use crate::hash::HashAlgorithm;
    use crate::store::{BlockSource, MemoryStore};
    use std::fs::File;
    use tempfile::TempDir;

    fn packer() -> Packer {
        Packer::new(EncoderConfig::default()).unwrap()
    }

    #[test]
    fn test_pack_to_writer_has_no_declared_root() {
        let files = vec![FileInput::bytes("a.txt", &b"hello"[..])];
        let (summary, bytes) = packer().pack_to_writer(files, Vec::new()).unwrap();

        assert_eq!(summary.bytes, bytes.len() as u64);
        assert_eq!(summary.size, 5);
        let reader = CarReader::new(&bytes[..]).unwrap();
        assert!(reader.roots().is_empty());
        let blocks: Vec<Block> = reader.blocks().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len() as u64, summary.blocks);
        assert_eq!(*blocks.last().unwrap().cid(), summary.root);
    }

    #[test]
    fn test_pack_to_file_declares_root() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.car");
        let files = vec![
            FileInput::bytes("dir/a", &b"aaa"[..]),
            FileInput::bytes("dir/b", &b"bbb"[..]),
        ];
        let summary = packer().pack_to_file(files, &path).unwrap();

        let (header, _) = CarHeader::read_from(&mut File::open(&path).unwrap()).unwrap();
        assert_eq!(header.roots, vec![summary.root]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), summary.bytes);

        let reader = IndexedCarReader::open(&path).unwrap();
        assert!(reader.get(&summary.root).unwrap().is_some());

        // only the archive is left in the directory
        let names: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_pack_to_file_failure_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.car");
        let files = vec![FileInput::path("missing", temp.path().join("does-not-exist"))];

        assert!(packer().pack_to_file(files, &path).is_err());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_pack_to_file_sha512_placeholder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("512.car");
        let packer =
            Packer::new(EncoderConfig::new().with_hash(HashAlgorithm::Sha2_512)).unwrap();
        let summary = packer
            .pack_to_file(PackInput::stream(&b"stream content"[..]), &path)
            .unwrap();
        assert_eq!(summary.root.hash().code(), 0x13);

        let (header, _) = CarHeader::read_from(&mut File::open(&path).unwrap()).unwrap();
        assert_eq!(header.roots, vec![summary.root]);
    }

    #[test]
    fn test_duplicate_blocks_written_once() {
        let files = vec![
            FileInput::bytes("one", &b"same"[..]),
            FileInput::bytes("two", &b"same"[..]),
        ];
        let (summary, bytes) = packer().pack_to_writer(files, Vec::new()).unwrap();
        // one shared leaf plus the directory
        assert_eq!(summary.blocks, 2);
        let count = CarReader::new(&bytes[..]).unwrap().cids().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_store_roundtrip() {
        let store = MemoryStore::new();
        let (root, size) = packer()
            .pack_into_store(vec![FileInput::bytes("f", &b"stored"[..])], &store)
            .unwrap();
        assert_eq!(size, 6);
        assert!(store.has(&root).unwrap());

        let bytes = write_archive_from_store(&store, vec![root], Vec::new()).unwrap();
        let reader = CarReader::new(&bytes[..]).unwrap();
        assert_eq!(reader.roots(), &[root]);
        assert_eq!(reader.blocks().count(), store.len());
    }

    #[test]
    fn test_same_input_same_root() {
        let make = || vec![FileInput::bytes("x/y", vec![21u8, 31])];
        let (a, _) = packer().pack_to_writer(make(), Vec::new()).unwrap();
        let (b, _) = packer().pack_to_writer(make(), Vec::new()).unwrap();
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Packer::new(EncoderConfig::new().with_tree_width(0)).is_err());
    }
}
