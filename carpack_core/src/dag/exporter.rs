//! Walking a DAG back into path-tagged entries.
//!
//! The exporter is a lazy, depth-first traversal with an explicit stack. A
//! directory entry is yielded before its children, so a consumer can create
//! the directory before writing into it. Blocks that are absent from the
//! source are reported as [`EntryKind::Missing`] and the walk carries on;
//! blocks that fail verification or cannot be decoded end the walk with an
//! error.

use super::codec::CodecRegistry;
use super::node::{DirLink, Node, prefix_width};
use super::shard::bucket_index;
use crate::error::{Error, Result};
use crate::block::Block;
use crate::store::BlockSource;
use cid::Cid;
use serde::Serialize;
use std::io::Write;

/// What an exported path is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// A bare raw block used directly as file content.
    Raw,
    /// Referenced but absent from the block source.
    Missing,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Raw => "raw",
            EntryKind::Missing => "missing",
        }
    }

    /// Whether the entry carries file content.
    pub fn has_content(&self) -> bool {
        matches!(self, EntryKind::File | EntryKind::Raw)
    }
}

/// One exported path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagEntry {
    /// Segments from the root; the first is the root's own name.
    pub path: Vec<String>,
    pub kind: EntryKind,
    pub cid: Cid,
    /// Content bytes; for a missing entry, the size its parent recorded.
    pub size: Option<u64>,
}

impl DagEntry {
    /// Path segments joined with `/`.
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }

    /// Depth below the root (the root itself is 0).
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Traversal options.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Check every fetched block against its CID.
    pub verify: bool,
    /// Name for the root path segment; defaults to the root CID.
    pub root_name: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            verify: true,
            root_name: None,
        }
    }
}

enum Task {
    /// Fetch a node and yield an entry for it.
    Visit {
        path: Vec<String>,
        cid: Cid,
        size: Option<u64>,
    },
    /// Fetch a nested shard and splice its entries into `dir`.
    Shard {
        dir: Vec<String>,
        cid: Cid,
        pos: ShardPos,
    },
}

/// Where a shard node sits in its directory's hash tree.
#[derive(Debug, Clone)]
struct ShardPos {
    fanout: u64,
    /// Bucket taken at each enclosing level, outermost first.
    buckets: Vec<u64>,
}

impl ShardPos {
    fn root(cid: &Cid, fanout: u64) -> Result<Self> {
        if fanout < 2 || !fanout.is_power_of_two() {
            return Err(Error::unsupported_node(
                *cid,
                format!("invalid shard fanout {}", fanout),
            ));
        }
        Ok(Self {
            fanout,
            buckets: Vec::new(),
        })
    }

    fn width(&self) -> usize {
        prefix_width(self.fanout)
    }

    fn bits(&self) -> u32 {
        self.fanout.trailing_zeros()
    }

    /// Position of the shard behind `bucket` at this level.
    fn child(&self, bucket: u64) -> Self {
        let mut buckets = self.buckets.clone();
        buckets.push(bucket);
        Self {
            fanout: self.fanout,
            buckets,
        }
    }

    /// Split an entry name into its bucket and the name after the label.
    ///
    /// Labels are uppercase hex, exactly `width` digits, below the fanout.
    fn split<'n>(&self, name: &'n str, cid: &Cid) -> Result<(u64, &'n str)> {
        let malformed = || {
            Error::unsupported_node(
                *cid,
                format!("shard entry name {:?} lacks a valid bucket label", name),
            )
        };
        let width = self.width();
        let label = name.get(..width).ok_or_else(malformed)?;
        if !label.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F')) {
            return Err(malformed());
        }
        let bucket = u64::from_str_radix(label, 16).map_err(|_| malformed())?;
        if bucket >= self.fanout {
            return Err(malformed());
        }
        Ok((bucket, &name[width..]))
    }

    /// Check that `name` hashes to every bucket on the way to this entry.
    fn check_member(&self, name: &str, bucket: u64, cid: &Cid) -> Result<()> {
        let hash = blake3::hash(name.as_bytes());
        let expected = self.buckets.iter().copied().chain(std::iter::once(bucket));
        for (depth, want) in expected.enumerate() {
            if bucket_index(hash.as_bytes(), depth as u32, self.bits()) != Some(want) {
                return Err(Error::unsupported_node(
                    *cid,
                    format!("shard entry {:?} is filed under the wrong bucket", name),
                ));
            }
        }
        Ok(())
    }
}

/// Lazy iterator over the entries under a root.
pub struct Exporter<'a, S: BlockSource + ?Sized> {
    source: &'a S,
    registry: CodecRegistry,
    verify: bool,
    stack: Vec<Task>,
    done: bool,
}

impl<'a, S: BlockSource + ?Sized> Exporter<'a, S> {
    pub fn new(source: &'a S, root: Cid, options: &ExportOptions) -> Self {
        let name = options
            .root_name
            .clone()
            .unwrap_or_else(|| root.to_string());
        Self {
            source,
            registry: CodecRegistry::default(),
            verify: options.verify,
            stack: vec![Task::Visit {
                path: vec![name],
                cid: root,
                size: None,
            }],
            done: false,
        }
    }

    /// Use a custom codec table.
    pub fn with_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn fetch(&self, cid: &Cid) -> Result<Option<Block>> {
        let Some(block) = self.source.get(cid)? else {
            return Ok(None);
        };
        if self.verify {
            block.verify()?;
        }
        Ok(Some(block))
    }

    /// Queue the children of a directory or shard node in stored order.
    fn push_children(
        &mut self,
        dir: &[String],
        entries: Vec<DirLink>,
        shard: Option<&ShardPos>,
    ) -> Result<()> {
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = match shard {
                None => entry.name,
                Some(pos) => {
                    let (bucket, rest) = pos.split(&entry.name, &entry.cid)?;
                    if rest.is_empty() {
                        tasks.push(Task::Shard {
                            dir: dir.to_vec(),
                            cid: entry.cid,
                            pos: pos.child(bucket),
                        });
                        continue;
                    }
                    pos.check_member(rest, bucket, &entry.cid)?;
                    rest.to_string()
                }
            };
            check_name(&name, &entry.cid)?;

            let mut path = dir.to_vec();
            path.push(name);
            tasks.push(Task::Visit {
                path,
                cid: entry.cid,
                size: Some(entry.size),
            });
        }
        self.stack.extend(tasks.into_iter().rev());
        Ok(())
    }

    /// Run one task, returning the entry it produced, if any.
    fn run(&mut self, task: Task) -> Result<Option<DagEntry>> {
        match task {
            Task::Visit { path, cid, size } => {
                let Some(block) = self.fetch(&cid)? else {
                    tracing::debug!(%cid, path = %path.join("/"), "block missing");
                    return Ok(Some(DagEntry {
                        path,
                        kind: EntryKind::Missing,
                        cid,
                        size,
                    }));
                };

                let (kind, size) = match self.registry.decode(&block)? {
                    Node::Raw(bytes) => (EntryKind::Raw, bytes.len() as u64),
                    Node::File(links) => (EntryKind::File, links.last().map_or(0, |l| l.size)),
                    Node::Directory(entries) => {
                        let size = entries.iter().map(|e| e.size).sum();
                        self.push_children(&path, entries, None)?;
                        (EntryKind::Directory, size)
                    }
                    Node::Shard { fanout, entries } => {
                        let size = entries.iter().map(|e| e.size).sum();
                        let pos = ShardPos::root(&cid, fanout)?;
                        self.push_children(&path, entries, Some(&pos))?;
                        (EntryKind::Directory, size)
                    }
                };

                Ok(Some(DagEntry {
                    path,
                    kind,
                    cid,
                    size: Some(size),
                }))
            }
            Task::Shard { dir, cid, pos } => {
                let Some(block) = self.fetch(&cid)? else {
                    // a lost bucket is reported against the directory holding it
                    tracing::debug!(%cid, path = %dir.join("/"), "shard block missing");
                    return Ok(Some(DagEntry {
                        path: dir,
                        kind: EntryKind::Missing,
                        cid,
                        size: None,
                    }));
                };

                match self.registry.decode(&block)? {
                    Node::Shard { fanout, entries } if fanout == pos.fanout => {
                        self.push_children(&dir, entries, Some(&pos))?;
                        Ok(None)
                    }
                    Node::Shard { fanout, .. } => Err(Error::unsupported_node(
                        cid,
                        format!("nested shard fanout {} differs from {}", fanout, pos.fanout),
                    )),
                    _ => Err(Error::unsupported_node(
                        cid,
                        "bucket link does not point at a shard node",
                    )),
                }
            }
        }
    }
}

/// Reject names that would escape the directory they are written into.
fn check_name(name: &str, cid: &Cid) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(Error::unsupported_node(
            *cid,
            format!("unsafe entry name {:?}", name),
        ));
    }
    Ok(())
}

impl<S: BlockSource + ?Sized> Iterator for Exporter<'_, S> {
    type Item = Result<DagEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(task) = self.stack.pop() {
            match self.run(task) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}

/// Write the content of the file rooted at `cid` to `writer`.
///
/// Leaves are written in order. Fails with `MissingBlock` if any block is
/// absent, and with `BlockVerificationFailed` on a digest mismatch when
/// `verify` is set. Returns the number of bytes written.
pub fn export_content<S, W>(source: &S, cid: &Cid, verify: bool, writer: &mut W) -> Result<u64>
where
    S: BlockSource + ?Sized,
    W: Write,
{
    let registry = CodecRegistry::default();
    let mut written = 0u64;
    let mut stack = vec![*cid];

    while let Some(next) = stack.pop() {
        let block = source.get(&next)?.ok_or_else(|| Error::missing_block(next))?;
        if verify {
            block.verify()?;
        }
        match registry.decode(&block)? {
            Node::Raw(bytes) => {
                writer.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            Node::File(links) => stack.extend(links.iter().rev().map(|l| l.cid)),
            Node::Directory(_) | Node::Shard { .. } => {
                return Err(Error::unsupported_node(next, "expected file content, found a directory"));
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::config::EncoderConfig;
    use crate::dag::encoder::{DagEncoder, FileInput};
    use crate::store::{BlockStore, MemoryStore};

    fn encode(inputs: Vec<FileInput>, config: &EncoderConfig) -> (MemoryStore, Cid) {
        let store = MemoryStore::new();
        let mut encoder = DagEncoder::new(inputs, config).unwrap();
        for block in &mut encoder {
            store.put(block.unwrap()).unwrap();
        }
        let root = encoder.root().unwrap().0;
        (store, root)
    }

    fn list(store: &MemoryStore, root: Cid, options: &ExportOptions) -> Vec<DagEntry> {
        Exporter::new(store, root, options)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn named() -> ExportOptions {
        ExportOptions {
            verify: true,
            root_name: Some(".".to_string()),
        }
    }

    #[test]
    fn test_directory_listing_order() {
        let (store, root) = encode(
            vec![
                FileInput::bytes("b.txt", &b"bee"[..]),
                FileInput::bytes("sub/c.txt", &b"sea"[..]),
                FileInput::bytes("a.txt", &b"ay"[..]),
            ],
            &EncoderConfig::default(),
        );
        let entries = list(&store, root, &named());
        let paths: Vec<String> = entries.iter().map(|e| e.path_string()).collect();
        assert_eq!(paths, vec![".", "./b.txt", "./sub", "./sub/c.txt", "./a.txt"]);

        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].size, Some(8));
        assert_eq!(entries[1].kind, EntryKind::Raw);
        assert_eq!(entries[1].size, Some(3));
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[test]
    fn test_root_name_defaults_to_cid() {
        let (store, root) = encode(
            vec![FileInput::bytes("f", &b"x"[..])],
            &EncoderConfig::default(),
        );
        let entries = list(&store, root, &ExportOptions::default());
        assert_eq!(entries[0].path, vec![root.to_string()]);
        assert_eq!(entries[1].path, vec![root.to_string(), "f".to_string()]);
    }

    #[test]
    fn test_multi_chunk_file_entry() {
        let data: Vec<u8> = (0..100u8).collect();
        let config = EncoderConfig::new()
            .with_chunk_size(10)
            .with_tree_width(4)
            .with_wrap(false);
        let (store, root) = encode(vec![FileInput::bytes("f", data.clone())], &config);

        let entries = list(&store, root, &ExportOptions::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, Some(100));

        let mut out = Vec::new();
        assert_eq!(export_content(&store, &root, true, &mut out).unwrap(), 100);
        assert_eq!(out, data);
    }

    #[test]
    fn test_sharded_and_plain_list_the_same() {
        let inputs = || {
            (0..40)
                .map(|i| FileInput::bytes(format!("dir/f{:02}", i), format!("content {}", i)))
                .collect::<Vec<_>>()
        };
        let plain = EncoderConfig::default();
        let sharded = EncoderConfig::new()
            .with_shard_threshold(8)
            .with_shard_fanout(4);

        let (plain_store, plain_root) = encode(inputs(), &plain);
        let (shard_store, shard_root) = encode(inputs(), &sharded);
        assert_ne!(plain_root, shard_root);

        let project = |entries: Vec<DagEntry>| {
            let mut items: Vec<(String, EntryKind, Option<u64>)> = entries
                .into_iter()
                .map(|e| (e.path_string(), e.kind, e.size))
                .collect();
            items.sort();
            items
        };
        let a = project(list(&plain_store, plain_root, &named()));
        let b = project(list(&shard_store, shard_root, &named()));
        assert_eq!(a.len(), 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_block_reported_and_walk_continues() {
        let (store, root) = encode(
            vec![
                FileInput::bytes("gone.txt", &b"will be removed"[..]),
                FileInput::bytes("kept.txt", &b"still here"[..]),
            ],
            &EncoderConfig::default(),
        );
        let gone = crate::hash::compute_cid(
            b"will be removed",
            crate::hash::HashAlgorithm::Sha2_256,
            crate::hash::codec::RAW,
        );
        assert!(store.remove(&gone));

        let entries = list(&store, root, &named());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].path_string(), "./gone.txt");
        assert_eq!(entries[1].kind, EntryKind::Missing);
        assert_eq!(entries[1].size, Some(15));
        assert_eq!(entries[2].kind, EntryKind::Raw);

        let mut out = Vec::new();
        assert!(matches!(
            export_content(&store, &gone, true, &mut out),
            Err(Error::MissingBlock { .. })
        ));
    }

    #[test]
    fn test_missing_root() {
        let store = MemoryStore::new();
        let root = crate::hash::compute_cid(
            b"nothing",
            crate::hash::HashAlgorithm::Sha2_256,
            crate::hash::codec::DAG_CBOR,
        );
        let entries = list(&store, root, &named());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Missing);
        assert_eq!(entries[0].path, vec!["."]);
    }

    #[test]
    fn test_tampered_block_is_fatal_unless_unverified() {
        let (store, root) = encode(
            vec![
                FileInput::bytes("a", &b"aaaa"[..]),
                FileInput::bytes("b", &b"bbbb"[..]),
            ],
            &EncoderConfig::default(),
        );
        let leaf = crate::hash::compute_cid(
            b"aaaa",
            crate::hash::HashAlgorithm::Sha2_256,
            crate::hash::codec::RAW,
        );
        store.overwrite(leaf, &b"aaab"[..]);

        let results: Vec<Result<DagEntry>> = Exporter::new(&store, root, &named()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(Error::BlockVerificationFailed { .. })
        ));

        let unverified = ExportOptions {
            verify: false,
            root_name: Some(".".to_string()),
        };
        assert_eq!(list(&store, root, &unverified).len(), 3);

        let mut out = Vec::new();
        assert!(matches!(
            export_content(&store, &leaf, true, &mut out),
            Err(Error::BlockVerificationFailed { .. })
        ));
    }

    #[test]
    fn test_export_content_rejects_directory() {
        let (store, root) = encode(
            vec![FileInput::bytes("a", &b"a"[..])],
            &EncoderConfig::default(),
        );
        let mut out = Vec::new();
        assert!(matches!(
            export_content(&store, &root, true, &mut out),
            Err(Error::UnsupportedNodeType { .. })
        ));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        use crate::dag::node::DagNode;
        use crate::hash::{HashAlgorithm, codec};

        let store = MemoryStore::new();
        let leaf = store
            .put(Block::encode(&b"x"[..], HashAlgorithm::Sha2_256, codec::RAW))
            .unwrap();
        let node = DagNode::Directory {
            entries: vec![DirLink::new("../escape", *leaf.cid(), 1)],
        };
        let dir = store
            .put(Block::encode(
                node.encode().unwrap(),
                HashAlgorithm::Sha2_256,
                codec::DAG_CBOR,
            ))
            .unwrap();

        let results: Vec<Result<DagEntry>> =
            Exporter::new(&store, *dir.cid(), &named()).collect();
        assert!(matches!(
            results.last().unwrap(),
            Err(Error::UnsupportedNodeType { .. })
        ));
    }

    /// Export a hand-built shard holding one leaf under `label`.
    fn shard_with_label(fanout: u64, label: &str, name: &str) -> Vec<Result<DagEntry>> {
        use crate::dag::node::DagNode;
        use crate::hash::{HashAlgorithm, codec};

        let store = MemoryStore::new();
        let leaf = store
            .put(Block::encode(&b"x"[..], HashAlgorithm::Sha2_256, codec::RAW))
            .unwrap();
        let node = DagNode::Shard {
            fanout,
            entries: vec![DirLink::new(format!("{}{}", label, name), *leaf.cid(), 1)],
        };
        let shard = store
            .put(Block::encode(
                node.encode().unwrap(),
                HashAlgorithm::Sha2_256,
                codec::DAG_CBOR,
            ))
            .unwrap();
        Exporter::new(&store, *shard.cid(), &named()).collect()
    }

    #[test]
    fn test_shard_labels_validated() {
        use crate::dag::node::bucket_label;

        let name = "x.txt";
        let hash = blake3::hash(name.as_bytes());
        let bucket = bucket_index(hash.as_bytes(), 0, 4).unwrap();
        let right = bucket_label(bucket, 16);
        let wrong = bucket_label((bucket + 1) % 16, 16);

        let ok = shard_with_label(16, &right, name);
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].as_ref().unwrap().path_string(), "./x.txt");

        let rejected = [
            (16, wrong),
            (16, right.to_lowercase()),
            (16, "G".to_string()),
            // in hex range but past a fanout of 4
            (4, "F".to_string()),
        ];
        for (fanout, label) in rejected {
            if fanout == 16 && label == right {
                // lowercase of a digit label is the same label
                continue;
            }
            let results = shard_with_label(fanout, &label, name);
            assert!(
                matches!(results.last().unwrap(), Err(Error::UnsupportedNodeType { .. })),
                "label {:?} accepted",
                label
            );
        }
    }

    #[test]
    fn test_deep_tree_uses_no_recursion() {
        let name = vec!["d"; 2000].join("/") + "/leaf";
        let (store, root) = encode(
            vec![FileInput::bytes(name, &b"deep"[..])],
            &EncoderConfig::default(),
        );
        let entries = list(&store, root, &named());
        assert_eq!(entries.len(), 2002);
        assert_eq!(entries.last().unwrap().depth(), 2001);
    }
}
