//! # Carpack Core
//!
//! Pack files and directories into content-addressed archives (CAR v1), and
//! unpack them again.
//!
//! Content is split into chunks, each chunk becomes a block named by the hash
//! of its bytes (a CID), and files and directories become DAG nodes linking to
//! their children. An archive is a header naming the root(s) followed by the
//! blocks. Reading an archive back verifies every block against its CID.
//!
//! ## Features
//!
//! - Fixed-size or content-defined chunking, balanced file trees
//! - Hash-sharded directory nodes for very large directories
//! - Streaming archive reader and writer, plus a seekable indexed reader
//! - In-memory, directory-backed and append-only log block stores
//! - Root resolution: explicit, declared in the header, or inferred
//! - Lazy DAG export with missing-block tolerance
//!
//! ## Example
//!
//! ```no_run
//! use carpack_core::{EncoderConfig, Packer, UnpackOptions, files_from_paths, unpack_archive};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let packer = Packer::new(EncoderConfig::default())?;
//!
//! // Pack a directory into an archive
//! let inputs = files_from_paths(&["./my-data"], false)?;
//! let summary = packer.pack_to_file(inputs, Path::new("my-data.car"))?;
//! println!("root: {}", summary.root);
//!
//! // Unpack it somewhere else
//! unpack_archive(Path::new("my-data.car"), Path::new("./restored"), &UnpackOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod car;
pub mod dag;
mod error;
pub mod hash;
mod pack;
mod roots;
pub mod store;
mod unpack;
mod walk;

pub use block::Block;
pub use car::{CarHeader, CarReader, CarWriter, IndexedCarReader};
pub use dag::{
    ChunkerConfig, CodecRegistry, DagEncoder, DagEntry, EncoderConfig, EntryKind, ExportOptions,
    Exporter, FileInput, InputSource, export_content,
};
pub use error::{Error, Result};
pub use hash::{HashAlgorithm, compute_cid, hash_archive, parse_cid};
pub use pack::{PackInput, PackSummary, Packer, write_archive_from_store};
pub use roots::{find_implicit_roots, resolve_roots};
pub use store::{BlockSource, BlockStore, FsStore, LogStore, MemoryStore};
pub use unpack::{
    FsTarget, UnpackOptions, UnpackSummary, UnpackTarget, load_archive, unpack_archive,
    unpack_file, unpack_indexed, unpack_root, unpack_to_dir,
};
pub use walk::files_from_paths;

pub use cid::Cid;
