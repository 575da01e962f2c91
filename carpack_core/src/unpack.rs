//! Extracting archives back into files and directories.

use crate::car::{CarHeader, CarReader, IndexedCarReader};
use crate::dag::{DagEntry, EntryKind, ExportOptions, Exporter, export_content};
use crate::error::{Error, Result};
use crate::roots::resolve_roots;
use crate::store::{BlockSource, BlockStore};
use cid::Cid;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Copy every block of a sequential archive into `store`.
///
/// Lets archives from non-seekable sources (pipes, sockets) be exported with
/// random access. Returns the archive header.
pub fn load_archive<R, S>(reader: R, store: &S) -> Result<CarHeader>
where
    R: Read,
    S: BlockStore + ?Sized,
{
    let car = CarReader::new(reader)?;
    let header = car.header().clone();

    let mut count = 0u64;
    for block in car.blocks() {
        store.put(block?)?;
        count += 1;
    }

    tracing::debug!(blocks = count, roots = header.roots.len(), "loaded archive into store");
    Ok(header)
}

/// Where unpacked entries go.
///
/// Paths are the exporter's segments; the first segment names the root.
pub trait UnpackTarget {
    fn create_dir(&mut self, path: &[String]) -> Result<()>;

    /// Open a sink for the content of the file at `path`.
    fn write_file(&mut self, path: &[String]) -> Result<Box<dyn Write + '_>>;
}

/// Writes entries under a directory on disk.
///
/// The root segment is replaced by the output directory, so a packed
/// directory unpacks *as* the output directory and a packed bare file
/// unpacks *to* the output path.
#[derive(Debug, Clone)]
pub struct FsTarget {
    output: PathBuf,
}

impl FsTarget {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    /// Filesystem location of an exported path.
    pub fn resolve(&self, path: &[String]) -> PathBuf {
        let mut resolved = self.output.clone();
        for segment in path.iter().skip(1) {
            resolved.push(segment);
        }
        resolved
    }
}

impl UnpackTarget for FsTarget {
    fn create_dir(&mut self, path: &[String]) -> Result<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn write_file(&mut self, path: &[String]) -> Result<Box<dyn Write + '_>> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(BufWriter::new(File::create(target)?)))
    }
}

/// Unpack options.
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Explicit roots; empty means use the header or infer.
    pub roots: Vec<Cid>,
    /// Verify every block before use.
    pub verify: bool,
    /// Skip missing blocks instead of failing.
    pub tolerate_missing: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            verify: true,
            tolerate_missing: false,
        }
    }
}

/// What an unpack produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub roots: Vec<Cid>,
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    /// Entries skipped because a block was missing (only when tolerated).
    pub missing: Vec<DagEntry>,
}

/// Export the DAG under `root` into `target`.
///
/// Fails with `MissingBlock` on the first absent block unless
/// `tolerate_missing` is set, in which case missing entries are collected in
/// the summary instead.
pub fn unpack_root<S, T>(
    source: &S,
    root: Cid,
    options: &UnpackOptions,
    target: &mut T,
    summary: &mut UnpackSummary,
) -> Result<()>
where
    S: BlockSource + ?Sized,
    T: UnpackTarget + ?Sized,
{
    let export_options = ExportOptions {
        verify: options.verify,
        root_name: None,
    };

    for entry in Exporter::new(source, root, &export_options) {
        let entry = entry?;
        match entry.kind {
            EntryKind::Directory => {
                target.create_dir(&entry.path)?;
                summary.directories += 1;
            }
            EntryKind::File | EntryKind::Raw => {
                let mut sink = target.write_file(&entry.path)?;
                let written = match export_content(source, &entry.cid, options.verify, &mut sink) {
                    Err(Error::MissingBlock { cid }) if options.tolerate_missing => {
                        tracing::warn!(path = %entry.path_string(), %cid, "file content incomplete");
                        summary.missing.push(entry.clone());
                        0
                    }
                    other => other?,
                };
                sink.flush()?;
                summary.files += 1;
                summary.bytes += written;
            }
            EntryKind::Missing => {
                if !options.tolerate_missing {
                    return Err(Error::missing_block(entry.cid));
                }
                tracing::warn!(path = %entry.path_string(), cid = %entry.cid, "skipping missing block");
                summary.missing.push(entry);
            }
        }
    }

    summary.roots.push(root);
    Ok(())
}

/// Resolve roots in an indexed archive and unpack them under `output`.
///
/// One root unpacks to `output` itself; several roots unpack to
/// `output/<root cid>` each.
pub fn unpack_indexed<R>(
    archive: &IndexedCarReader<R>,
    output: &Path,
    options: &UnpackOptions,
) -> Result<UnpackSummary>
where
    R: Read + std::io::Seek,
{
    let roots = resolve_roots(&options.roots, archive.roots(), || Ok(archive.blocks()))?;
    unpack_to_dir(archive, &roots, output, options)
}

/// Unpack already resolved `roots` from any block source under `output`.
pub fn unpack_to_dir<S>(
    source: &S,
    roots: &[Cid],
    output: &Path,
    options: &UnpackOptions,
) -> Result<UnpackSummary>
where
    S: BlockSource + ?Sized,
{
    let mut summary = UnpackSummary::default();

    if let [root] = roots {
        unpack_root(source, *root, options, &mut FsTarget::new(output), &mut summary)?;
    } else {
        for root in roots {
            let mut target = FsTarget::new(output.join(root.to_string()));
            unpack_root(source, *root, options, &mut target, &mut summary)?;
        }
    }

    tracing::debug!(
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "unpacked archive"
    );
    Ok(summary)
}

/// Unpack an archive file into `output`.
pub fn unpack_archive(archive: &Path, output: &Path, options: &UnpackOptions) -> Result<UnpackSummary> {
    let reader = IndexedCarReader::open(archive)?;
    unpack_indexed(&reader, output, options)
}

/// Write the content of a single-file DAG to `writer`.
///
/// Fails with `InvalidInput` when the root is a directory.
pub fn unpack_file<S, W>(source: &S, root: Cid, verify: bool, writer: &mut W) -> Result<u64>
where
    S: BlockSource + ?Sized,
    W: Write,
{
    let options = ExportOptions {
        verify,
        root_name: None,
    };
    let first = Exporter::new(source, root, &options)
        .next()
        .ok_or_else(|| Error::no_root("nothing to export"))??;

    match first.kind {
        EntryKind::File | EntryKind::Raw => export_content(source, &root, verify, writer),
        EntryKind::Missing => Err(Error::missing_block(root)),
        EntryKind::Directory => Err(Error::invalid_input(format!(
            "root {} is a directory, not a file; give an output directory",
            root
        ))),
    }
}
