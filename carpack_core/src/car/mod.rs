//! Archive container format.
//!
//! ```text
//! varint(len(header)) ++ header                  header = dag-cbor {roots, version: 1}
//! varint(len(cid) + len(bytes)) ++ cid ++ bytes  repeated, in write order
//! ```
//!
//! No index is embedded. [`IndexedCarReader`] builds one in memory by scanning
//! the frames once.

pub mod header;
pub mod indexed;
pub mod reader;
pub mod varint;
pub mod writer;

pub use header::{CAR_VERSION, CarHeader};
pub use indexed::IndexedCarReader;
pub use reader::{CarReader, FrameInfo};
pub use writer::{CarWriter, encode_frame, update_roots};
