//! Choosing which root(s) to export.
//!
//! In priority order: CIDs given by the caller, the single root declared in
//! the archive header, or the roots inferred from the block graph when the
//! header declares none.

use crate::block::Block;
use crate::dag::CodecRegistry;
use crate::error::{Error, Result};
use cid::Cid;
use indexmap::IndexSet;
use std::collections::HashSet;

/// Infer roots from a flat block collection by elimination.
///
/// A block is a root candidate unless some other block links to it. Once a
/// CID has been seen as a link target it can never become a candidate again,
/// whatever order the blocks come in. Candidates keep first-seen order.
/// Blocks in a format the registry does not know are treated as leaves.
pub fn find_implicit_roots<I>(blocks: I, registry: &CodecRegistry) -> Result<Vec<Cid>>
where
    I: IntoIterator<Item = Result<Block>>,
{
    let mut roots: IndexSet<Cid> = IndexSet::new();
    let mut not_roots: HashSet<Cid> = HashSet::new();

    for block in blocks {
        let block = block?;
        let cid = *block.cid();

        if registry.get(cid.codec()).is_some() {
            for link in registry.links(&block)? {
                roots.shift_remove(&link);
                not_roots.insert(link);
            }
        } else {
            tracing::debug!(%cid, codec = cid.codec(), "unknown codec, treating block as a leaf");
        }

        if !not_roots.contains(&cid) {
            roots.insert(cid);
        }
    }

    Ok(roots.into_iter().collect())
}

/// Pick the roots to export.
///
/// `blocks` is only invoked when inference is needed, so callers can defer
/// the full scan.
pub fn resolve_roots<F, I>(explicit: &[Cid], declared: &[Cid], blocks: F) -> Result<Vec<Cid>>
where
    F: FnOnce() -> Result<I>,
    I: IntoIterator<Item = Result<Block>>,
{
    if !explicit.is_empty() {
        tracing::debug!(roots = explicit.len(), "using explicit roots");
        return Ok(explicit.to_vec());
    }

    match declared {
        [root] => {
            tracing::debug!(%root, "using declared root");
            Ok(vec![*root])
        }
        [] => {
            let inferred = find_implicit_roots(blocks()?, &CodecRegistry::default())?;
            match inferred.as_slice() {
                [root] => {
                    tracing::debug!(%root, "inferred implicit root");
                    Ok(inferred)
                }
                [] => Err(Error::no_root(
                    "archive declares no roots and contains no blocks",
                )),
                _ => Err(Error::ambiguous_root(inferred)),
            }
        }
        _ => Err(Error::ambiguous_root(declared.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::node::{DagNode, DirLink, FileLink};
    use crate::hash::{HashAlgorithm, codec};

    fn raw(data: &[u8]) -> Block {
        Block::encode(data.to_vec(), HashAlgorithm::Sha2_256, codec::RAW)
    }

    fn file_node(children: &[&Block]) -> Block {
        let mut total = 0;
        let links = children
            .iter()
            .map(|b| {
                total += b.len() as u64;
                FileLink {
                    cid: *b.cid(),
                    size: total,
                }
            })
            .collect();
        let bytes = DagNode::File { links }.encode().unwrap();
        Block::encode(bytes, HashAlgorithm::Sha2_256, codec::DAG_CBOR)
    }

    fn ok(blocks: Vec<Block>) -> Vec<Result<Block>> {
        blocks.into_iter().map(Ok).collect()
    }

    #[test]
    fn test_parent_is_sole_root_any_order() {
        let a = raw(b"a");
        let b = raw(b"b");
        let c = raw(b"c");
        let parent = file_node(&[&a, &b, &c]);
        let registry = CodecRegistry::default();

        let children_first = vec![a.clone(), b.clone(), c.clone(), parent.clone()];
        assert_eq!(
            find_implicit_roots(ok(children_first), &registry).unwrap(),
            vec![*parent.cid()]
        );

        let parent_first = vec![parent.clone(), a, b, c];
        assert_eq!(
            find_implicit_roots(ok(parent_first), &registry).unwrap(),
            vec![*parent.cid()]
        );
    }

    #[test]
    fn test_removed_candidate_never_returns() {
        let leaf = raw(b"leaf");
        let parent = file_node(&[&leaf]);
        let registry = CodecRegistry::default();

        // the leaf shows up again after being claimed as a child
        let blocks = vec![leaf.clone(), parent.clone(), leaf.clone()];
        assert_eq!(
            find_implicit_roots(ok(blocks), &registry).unwrap(),
            vec![*parent.cid()]
        );
    }

    #[test]
    fn test_two_trees_two_roots() {
        let a = raw(b"a");
        let b = raw(b"b");
        let pa = file_node(&[&a]);
        let dir = Block::encode(
            DagNode::Directory {
                entries: vec![DirLink::new("b", *b.cid(), 1)],
            }
            .encode()
            .unwrap(),
            HashAlgorithm::Sha2_256,
            codec::DAG_CBOR,
        );
        let registry = CodecRegistry::default();
        let roots =
            find_implicit_roots(ok(vec![a, pa.clone(), b, dir.clone()]), &registry).unwrap();
        assert_eq!(roots, vec![*pa.cid(), *dir.cid()]);
    }

    #[test]
    fn test_resolve_priority() {
        let a = raw(b"a");
        let b = raw(b"b");
        let never_called = || -> Result<Vec<Result<Block>>> { panic!("scan not needed") };

        // explicit beats declared, even when declared is ambiguous
        assert_eq!(
            resolve_roots(&[*a.cid()], &[*a.cid(), *b.cid()], never_called).unwrap(),
            vec![*a.cid()]
        );
        assert_eq!(
            resolve_roots(&[], &[*b.cid()], never_called).unwrap(),
            vec![*b.cid()]
        );
        assert!(matches!(
            resolve_roots(&[], &[*a.cid(), *b.cid()], never_called),
            Err(Error::AmbiguousRoot { candidates }) if candidates.len() == 2
        ));
    }

    #[test]
    fn test_resolve_inferred() {
        let a = raw(b"a");
        let parent = file_node(&[&a]);

        let blocks = vec![a.clone(), parent.clone()];
        assert_eq!(
            resolve_roots(&[], &[], || Ok(ok(blocks))).unwrap(),
            vec![*parent.cid()]
        );

        let unrelated = vec![raw(b"x"), raw(b"y")];
        assert!(matches!(
            resolve_roots(&[], &[], || Ok(ok(unrelated))),
            Err(Error::AmbiguousRoot { .. })
        ));

        assert!(matches!(
            resolve_roots(&[], &[], || Ok(Vec::<Result<Block>>::new())),
            Err(Error::NoRoot { .. })
        ));
    }

    #[test]
    fn test_unknown_codec_is_leaf() {
        let foreign = Block::encode(&b"pb"[..], HashAlgorithm::Sha2_256, 0x70);
        let roots =
            find_implicit_roots(ok(vec![foreign.clone()]), &CodecRegistry::default()).unwrap();
        assert_eq!(roots, vec![*foreign.cid()]);
    }
}
