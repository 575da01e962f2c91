//! Merkle DAG encoding and export.

pub mod chunker;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod exporter;
pub mod node;
pub mod pb;
pub mod shard;

pub use chunker::{Chunker, ChunkerConfig};
pub use codec::{CodecEntry, CodecRegistry};
pub use config::EncoderConfig;
pub use encoder::{DagEncoder, DirectoryEncoder, FileEncoder, FileInput, InputSource};
pub use exporter::{DagEntry, EntryKind, ExportOptions, Exporter, export_content};
pub use node::{DagNode, DirLink, FileLink, Node};
