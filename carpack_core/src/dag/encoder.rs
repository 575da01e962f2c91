//! Turning byte streams and directory trees into blocks.
//!
//! Both encoders are pull-based iterators: nothing is read from the input
//! until the consumer asks for the next block, and blocks always come out
//! children before parents, so the last block produced is the root.

use super::chunker::Chunker;
use super::config::EncoderConfig;
use super::node::{DagNode, DirLink, FileLink};
use super::shard::build_directory;
use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, codec};
use bytes::Bytes;
use cid::Cid;
use indexmap::IndexMap;
use indexmap::map::Entry as MapEntry;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

/// Where the content of one input entry comes from.
pub enum InputSource {
    /// A file opened when the encoder reaches it.
    Path(PathBuf),
    /// In-memory content.
    Bytes(Bytes),
    /// Any byte stream.
    Reader(Box<dyn Read + Send>),
    /// A directory with no content of its own; keeps empty directories.
    Directory,
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            InputSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            InputSource::Reader(_) => f.write_str("Reader"),
            InputSource::Directory => f.write_str("Directory"),
        }
    }
}

impl InputSource {
    fn open(self) -> Result<Box<dyn Read + Send>> {
        match self {
            InputSource::Path(path) => Ok(Box::new(File::open(path)?)),
            InputSource::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes))),
            InputSource::Reader(reader) => Ok(reader),
            InputSource::Directory => Err(Error::invalid_input("a directory has no content")),
        }
    }
}

/// One named input: `/`-separated relative path plus content.
#[derive(Debug)]
pub struct FileInput {
    pub name: String,
    pub source: InputSource,
}

impl FileInput {
    pub fn new(name: impl Into<String>, source: InputSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn bytes(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self::new(name, InputSource::Bytes(content.into()))
    }

    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, InputSource::Path(path.into()))
    }

    pub fn reader(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self::new(name, InputSource::Reader(Box::new(reader)))
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, InputSource::Directory)
    }

    fn is_directory(&self) -> bool {
        matches!(self.source, InputSource::Directory)
    }
}

/// Encodes one byte stream as raw leaves plus a balanced tree of file nodes.
///
/// A stream that fits in a single chunk is just that raw leaf. Otherwise each
/// level of the tree holds at most `tree_width` links; a level that fills up
/// is packed into a node one level higher straight away, so memory use is
/// bounded by `tree_width` times the tree depth.
pub struct FileEncoder<R: Read> {
    chunker: Chunker<R>,
    hash: HashAlgorithm,
    tree_width: usize,
    levels: Vec<Vec<(Cid, u64)>>,
    pending: VecDeque<Block>,
    root: Option<(Cid, u64)>,
    finished: bool,
}

impl<R: Read> FileEncoder<R> {
    pub fn new(reader: R, config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunker: Chunker::new(reader, &config.chunker)?,
            hash: config.hash,
            tree_width: config.tree_width,
            levels: Vec::new(),
            pending: VecDeque::new(),
            root: None,
            finished: false,
        })
    }

    /// Root CID and content size, once every block has been pulled.
    pub fn root(&self) -> Option<(Cid, u64)> {
        self.root
    }

    /// Add a link at `level`, packing full levels upward.
    fn push_link(&mut self, mut level: usize, mut link: (Cid, u64)) -> Result<()> {
        loop {
            if self.levels.len() == level {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(link);
            if self.levels[level].len() < self.tree_width {
                return Ok(());
            }
            let children = std::mem::take(&mut self.levels[level]);
            link = self.pack(children)?;
            level += 1;
        }
    }

    /// Build a file node over `children`, queueing its block.
    fn pack(&mut self, children: Vec<(Cid, u64)>) -> Result<(Cid, u64)> {
        let mut total = 0;
        let links = children
            .into_iter()
            .map(|(cid, size)| {
                total += size;
                FileLink { cid, size: total }
            })
            .collect();

        let block = Block::encode(DagNode::File { links }.encode()?, self.hash, codec::DAG_CBOR);
        let cid = *block.cid();
        self.pending.push_back(block);
        Ok((cid, total))
    }

    /// Collapse the partially filled levels bottom-up into a single root.
    fn finish(&mut self) -> Result<()> {
        let top = self.levels.len().saturating_sub(1);
        for i in 0..self.levels.len() {
            let level = std::mem::take(&mut self.levels[i]);
            if level.is_empty() {
                continue;
            }
            if i == top && level.len() == 1 {
                self.root = Some(level[0]);
                break;
            }
            let link = self.pack(level)?;
            if i == top {
                self.root = Some(link);
            } else {
                self.levels[i + 1].push(link);
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Option<Result<Block>> {
        self.finished = true;
        self.pending.clear();
        Some(Err(err))
    }
}

impl<R: Read> Iterator for FileEncoder<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(block) = self.pending.pop_front() {
                return Some(Ok(block));
            }
            if self.finished {
                return None;
            }
            match self.chunker.next() {
                Some(Ok(chunk)) => {
                    let leaf = Block::encode(chunk, self.hash, codec::RAW);
                    if let Err(e) = self.push_link(0, (*leaf.cid(), leaf.len() as u64)) {
                        return self.fail(e);
                    }
                    return Some(Ok(leaf));
                }
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.finished = true;
                    if let Err(e) = self.finish() {
                        return self.fail(e);
                    }
                }
            }
        }
    }
}

/// Input tree node.
enum TreeEntry {
    File(InputSource),
    Dir(IndexMap<String, TreeEntry>),
}

/// Split a relative input name into path segments.
///
/// Leading `/` and `.` segments are dropped; `..` is rejected.
fn split_name(name: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = name
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        return Err(Error::invalid_input(format!("empty input name: {:?}", name)));
    }
    if segments.contains(&"..") {
        return Err(Error::invalid_input(format!(
            "input name escapes its root: {:?}",
            name
        )));
    }
    Ok(segments)
}

/// Arrange named inputs into a tree, in first-seen order.
fn build_tree(inputs: Vec<FileInput>) -> Result<IndexMap<String, TreeEntry>> {
    let mut root: IndexMap<String, TreeEntry> = IndexMap::new();

    for input in inputs {
        let segments = split_name(&input.name)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| Error::invalid_input("empty input name"))?;

        let mut dir = &mut root;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = dir
                .entry(segment.to_string())
                .or_insert_with(|| TreeEntry::Dir(IndexMap::new()));
            dir = match entry {
                TreeEntry::Dir(children) => children,
                TreeEntry::File(_) => {
                    return Err(Error::path_conflict(
                        segments[..=depth].join("/"),
                        "is a file but is also used as a directory",
                    ));
                }
            };
        }

        let is_dir = input.is_directory();
        match dir.entry(last.to_string()) {
            MapEntry::Vacant(slot) => {
                slot.insert(if is_dir {
                    TreeEntry::Dir(IndexMap::new())
                } else {
                    TreeEntry::File(input.source)
                });
            }
            MapEntry::Occupied(slot) => match (slot.get(), is_dir) {
                (TreeEntry::Dir(_), true) => {}
                (TreeEntry::Dir(_), false) => {
                    return Err(Error::path_conflict(
                        segments.join("/"),
                        "is a directory but is also given as a file",
                    ));
                }
                (TreeEntry::File(_), true) => {
                    return Err(Error::path_conflict(
                        segments.join("/"),
                        "is a file but is also used as a directory",
                    ));
                }
                (TreeEntry::File(_), false) => {
                    return Err(Error::path_conflict(
                        segments.join("/"),
                        "is given more than once",
                    ));
                }
            },
        }
    }

    Ok(root)
}

/// One directory being encoded.
struct Frame {
    name: String,
    entries: indexmap::map::IntoIter<String, TreeEntry>,
    links: Vec<DirLink>,
}

/// Encodes a tree of named inputs depth-first with an explicit stack.
///
/// The root is a directory node holding the top-level names. Each file is
/// encoded as it is reached, then each directory once all its children are
/// done.
pub struct DirectoryEncoder {
    config: EncoderConfig,
    stack: Vec<Frame>,
    active: Option<(String, FileEncoder<Box<dyn Read + Send>>)>,
    pending: VecDeque<Block>,
    root: Option<(Cid, u64)>,
    failed: bool,
}

impl DirectoryEncoder {
    /// Validate the inputs and build the tree. No content is read yet.
    pub fn new(inputs: Vec<FileInput>, config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        let tree = build_tree(inputs)?;
        Ok(Self {
            config: config.clone(),
            stack: vec![Frame {
                name: String::new(),
                entries: tree.into_iter(),
                links: Vec::new(),
            }],
            active: None,
            pending: VecDeque::new(),
            root: None,
            failed: false,
        })
    }

    /// Root CID and content size, once every block has been pulled.
    pub fn root(&self) -> Option<(Cid, u64)> {
        self.root
    }

    /// Advance the traversal by one step, possibly producing a block.
    fn step(&mut self) -> Result<Option<Block>> {
        if let Some((name, encoder)) = self.active.as_mut() {
            if let Some(block) = encoder.next() {
                return block.map(Some);
            }
            let (cid, size) = encoder
                .root()
                .ok_or_else(|| Error::encode(format!("file {} produced no root", name)))?;
            let name = std::mem::take(name);
            self.active = None;
            self.add_link(DirLink::new(name, cid, size));
            return Ok(None);
        }

        let Some(frame) = self.stack.last_mut() else {
            return Ok(None);
        };

        match frame.entries.next() {
            Some((name, TreeEntry::File(source))) => {
                let encoder = FileEncoder::new(source.open()?, &self.config)?;
                self.active = Some((name, encoder));
            }
            Some((name, TreeEntry::Dir(children))) => {
                self.stack.push(Frame {
                    name,
                    entries: children.into_iter(),
                    links: Vec::new(),
                });
            }
            None => {
                let Some(frame) = self.stack.pop() else {
                    return Ok(None);
                };
                let mut blocks = Vec::new();
                let (cid, size) = build_directory(frame.links, &self.config, &mut blocks)?;
                self.pending.extend(blocks);
                if self.stack.is_empty() {
                    self.root = Some((cid, size));
                } else {
                    self.add_link(DirLink::new(frame.name, cid, size));
                }
            }
        }
        Ok(None)
    }

    fn add_link(&mut self, link: DirLink) {
        if let Some(parent) = self.stack.last_mut() {
            parent.links.push(link);
        }
    }

    fn is_done(&self) -> bool {
        self.active.is_none() && self.stack.is_empty()
    }
}

impl Iterator for DirectoryEncoder {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(block) = self.pending.pop_front() {
                return Some(Ok(block));
            }
            if self.is_done() {
                return None;
            }
            match self.step() {
                Ok(Some(block)) => return Some(Ok(block)),
                Ok(None) => {}
                Err(e) => {
                    self.failed = true;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Encoder for a whole input set: a bare file or a directory tree.
pub enum DagEncoder {
    File(FileEncoder<Box<dyn Read + Send>>),
    Directory(DirectoryEncoder),
}

impl DagEncoder {
    /// Pick the encoding for `inputs`.
    ///
    /// A single file input with wrapping disabled is encoded as a bare file;
    /// anything else becomes a directory whose entries are the top-level
    /// input names.
    pub fn new(mut inputs: Vec<FileInput>, config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        if inputs.is_empty() {
            return Err(Error::invalid_input("nothing to encode: no inputs given"));
        }

        if inputs.len() == 1 && !config.wrap && !inputs[0].is_directory() {
            let input = inputs.remove(0);
            split_name(&input.name)?;
            let encoder = FileEncoder::new(input.source.open()?, config)?;
            return Ok(DagEncoder::File(encoder));
        }

        Ok(DagEncoder::Directory(DirectoryEncoder::new(inputs, config)?))
    }

    /// Encode a single unnamed byte stream as a bare file.
    pub fn from_reader(reader: impl Read + Send + 'static, config: &EncoderConfig) -> Result<Self> {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        Ok(DagEncoder::File(FileEncoder::new(reader, config)?))
    }

    /// Root CID and content size, once every block has been pulled.
    pub fn root(&self) -> Option<(Cid, u64)> {
        match self {
            DagEncoder::File(encoder) => encoder.root(),
            DagEncoder::Directory(encoder) => encoder.root(),
        }
    }
}

impl Iterator for DagEncoder {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            DagEncoder::File(encoder) => encoder.next(),
            DagEncoder::Directory(encoder) => encoder.next(),
        }
    }
}
