//! Splitting file content into leaf-sized chunks.

use crate::error::{Error, Result};
use bytes::Bytes;
use fastcdc::v2020::{
    AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN, StreamCDC,
};
use std::io::{self, ErrorKind, Read};

/// Reference leaf size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// How file content is cut into leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkerConfig {
    /// Fixed-size leaves; only the last one may be shorter.
    Fixed { chunk_size: usize },
    /// Content-defined boundaries using FastCDC.
    ContentDefined {
        /// Minimum chunk size in bytes.
        min_size: u32,
        /// Average (target) chunk size in bytes.
        avg_size: u32,
        /// Maximum chunk size in bytes.
        max_size: u32,
    },
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig::Fixed {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Content-defined chunking averaging 256 KiB.
    pub fn content_defined() -> Self {
        ChunkerConfig::ContentDefined {
            min_size: 64 * 1024,   // 64 KB
            avg_size: 256 * 1024,  // 256 KB
            max_size: 1024 * 1024, // 1 MB
        }
    }

    /// Reject sizes the chunker cannot work with.
    pub fn validate(&self) -> Result<()> {
        match *self {
            ChunkerConfig::Fixed { chunk_size } => {
                if chunk_size == 0 {
                    return Err(Error::invalid_input("chunk size must be greater than zero"));
                }
            }
            ChunkerConfig::ContentDefined {
                min_size,
                avg_size,
                max_size,
            } => {
                if !(MINIMUM_MIN..=MINIMUM_MAX).contains(&min_size)
                    || !(AVERAGE_MIN..=AVERAGE_MAX).contains(&avg_size)
                    || !(MAXIMUM_MIN..=MAXIMUM_MAX).contains(&max_size)
                {
                    return Err(Error::invalid_input(format!(
                        "content-defined chunk sizes out of range: min {}..={}, avg {}..={}, max {}..={}",
                        MINIMUM_MIN, MINIMUM_MAX, AVERAGE_MIN, AVERAGE_MAX, MAXIMUM_MIN, MAXIMUM_MAX
                    )));
                }
                if !(min_size <= avg_size && avg_size <= max_size) {
                    return Err(Error::invalid_input(
                        "content-defined chunk sizes must satisfy min <= avg <= max",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Largest chunk this configuration can produce.
    pub fn max_chunk_size(&self) -> usize {
        match *self {
            ChunkerConfig::Fixed { chunk_size } => chunk_size,
            ChunkerConfig::ContentDefined { max_size, .. } => max_size as usize,
        }
    }
}

enum Strategy<R: Read> {
    Fixed { reader: R, chunk_size: usize },
    ContentDefined(StreamCDC<R>),
}

/// Pulls chunks from a reader on demand.
///
/// Empty input yields exactly one empty chunk, so every file has at least one
/// leaf.
pub struct Chunker<R: Read> {
    strategy: Strategy<R>,
    emitted: bool,
    done: bool,
}

impl<R: Read> Chunker<R> {
    /// Create a chunker, rejecting an invalid configuration.
    pub fn new(reader: R, config: &ChunkerConfig) -> Result<Self> {
        config.validate()?;
        let strategy = match *config {
            ChunkerConfig::Fixed { chunk_size } => Strategy::Fixed { reader, chunk_size },
            ChunkerConfig::ContentDefined {
                min_size,
                avg_size,
                max_size,
            } => Strategy::ContentDefined(StreamCDC::new(reader, min_size, avg_size, max_size)),
        };
        Ok(Self {
            strategy,
            emitted: false,
            done: false,
        })
    }

    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.strategy {
            Strategy::Fixed { reader, chunk_size } => {
                let buf = read_full(reader, *chunk_size)?;
                Ok((!buf.is_empty()).then(|| Bytes::from(buf)))
            }
            Strategy::ContentDefined(cdc) => match cdc.next() {
                Some(Ok(chunk)) => Ok(Some(Bytes::from(chunk.data))),
                Some(Err(e)) => Err(io::Error::other(format!("chunking failed: {:?}", e)).into()),
                None => Ok(None),
            },
        }
    }
}

/// Read until `limit` bytes are buffered or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => {
                self.emitted = true;
                Some(Ok(chunk))
            }
            Ok(None) => {
                self.done = true;
                if self.emitted {
                    None
                } else {
                    self.emitted = true;
                    Some(Ok(Bytes::new()))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
