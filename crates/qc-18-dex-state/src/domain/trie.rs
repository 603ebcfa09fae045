//! # Merkle Patricia Trie
//!
//! Hexary authenticated trie over fixed-width 32-byte paths.
//!
//! ## Node Residency
//!
//! A freshly opened trie holds only its root hash. Reads resolve nodes from
//! the [`TrieDatabase`](crate::ports::TrieDatabase) on demand without caching them; writes pull the nodes
//! on their path into memory and mutate them in place. `commit` persists every
//! in-memory node as one batch and drops back to a hash-only root.
//!
//! ## Atomicity
//!
//! Every node load a mutation needs happens before the mutation changes any
//! structure, so a missing or corrupt node leaves the trie content untouched.
//! Commit writes the batch before releasing the in-memory tree.
//!
//! ## Ordering
//!
//! Children are visited in nibble order, so iteration yields paths in
//! ascending byte order and `leftmost`/`rightmost` are single descents.

use super::{
    codec::keccak256,
    nibbles::Nibbles,
    node::{NodeHandle, TrieNode},
    DexStateError, Hash, TrieError, EMPTY_TRIE_ROOT, KEY_LEN,
};
use crate::ports::SharedTrieDb;
use std::borrow::Cow;

/// A trie path. Always exactly 32 bytes (64 nibbles).
pub type TrieKey = [u8; KEY_LEN];

/// Key/value pair as stored in the trie.
pub type TrieEntry = (TrieKey, Vec<u8>);

/// Hexary Merkle Patricia Trie bound to a node database.
pub struct MerkleTrie {
    root: NodeHandle,
    db: SharedTrieDb,
    max_depth: usize,
}

impl MerkleTrie {
    /// Create an empty trie.
    pub fn new(db: SharedTrieDb, max_depth: usize) -> Self {
        Self {
            root: NodeHandle::InMemory(Box::new(TrieNode::Empty)),
            db,
            max_depth,
        }
    }

    /// Open the trie committed under `root`.
    ///
    /// Fails with `TrieOpen` if the root node is not in the database.
    pub fn open(root: Hash, db: SharedTrieDb, max_depth: usize) -> Result<Self, DexStateError> {
        if root == EMPTY_TRIE_ROOT {
            return Ok(Self::new(db, max_depth));
        }
        match db.get_node(&root) {
            Ok(Some(_)) => Ok(Self {
                root: NodeHandle::Hash(root),
                db,
                max_depth,
            }),
            Ok(None) => Err(DexStateError::TrieOpen { root }),
            Err(e) => Err(DexStateError::Database(e.to_string())),
        }
    }

    /// Current root hash, including uncommitted changes.
    pub fn root_hash(&self) -> Hash {
        self.root.hash()
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, NodeHandle::InMemory(node) if matches!(**node, TrieNode::Empty))
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Look up the value stored at `key`.
    pub fn get(&self, key: &TrieKey) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::from_bytes(key);
        self.get_at(&self.root, &path.0, 0)
    }

    fn get_at(
        &self,
        handle: &NodeHandle,
        path: &[u8],
        depth: usize,
    ) -> Result<Option<Vec<u8>>, TrieError> {
        self.check_depth(depth)?;
        let node = self.resolve(handle)?;
        match node.as_ref() {
            TrieNode::Empty => Ok(None),
            TrieNode::Leaf {
                path: leaf_path,
                value,
            } => Ok((leaf_path.0.as_slice() == path).then(|| value.clone())),
            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                if path.starts_with(&ext_path.0) {
                    self.get_at(child, &path[ext_path.len()..], depth + ext_path.len())
                } else {
                    Ok(None)
                }
            }
            TrieNode::Branch { children } => match path.split_first() {
                Some((&nibble, rest)) => match &children[nibble as usize] {
                    Some(child) => self.get_at(child, rest, depth + 1),
                    None => Ok(None),
                },
                None => Ok(None),
            },
        }
    }

    /// Entry with the smallest path.
    pub fn leftmost(&self) -> Result<Option<TrieEntry>, TrieError> {
        self.extreme(false)
    }

    /// Entry with the largest path.
    pub fn rightmost(&self) -> Result<Option<TrieEntry>, TrieError> {
        self.extreme(true)
    }

    fn extreme(&self, rightmost: bool) -> Result<Option<TrieEntry>, TrieError> {
        self.extreme_at(&self.root, Nibbles::default(), rightmost)
    }

    fn extreme_at(
        &self,
        handle: &NodeHandle,
        prefix: Nibbles,
        rightmost: bool,
    ) -> Result<Option<TrieEntry>, TrieError> {
        self.check_depth(prefix.len())?;
        let node = self.resolve(handle)?;
        match node.as_ref() {
            TrieNode::Empty => Ok(None),
            TrieNode::Leaf { path, value } => {
                let key = to_key(&prefix.join(None, path))?;
                Ok(Some((key, value.clone())))
            }
            TrieNode::Extension { path, child } => {
                self.extreme_at(child, prefix.join(None, path), rightmost)
            }
            TrieNode::Branch { children } => {
                let mut occupied = children
                    .iter()
                    .enumerate()
                    .filter_map(|(i, c)| c.as_ref().map(|c| (i, c)));
                let picked = if rightmost {
                    occupied.next_back()
                } else {
                    occupied.next()
                };
                let Some((nibble, child)) = picked else {
                    return Err(TrieError::MalformedNode("branch without children".into()));
                };
                let prefix = prefix.join(Some(nibble as u8), &Nibbles::default());
                self.extreme_at(child, prefix, rightmost)
            }
        }
    }

    /// Ordered iterator over every entry, ascending by path.
    ///
    /// Borrows the trie, so the sequence reflects the state at call time.
    pub fn iter(&self) -> TrieIter<'_> {
        TrieIter {
            trie: self,
            stack: vec![(Nibbles::default(), Cow::Borrowed(&self.root))],
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Insert or overwrite the value at `key`.
    pub fn insert(&mut self, key: &TrieKey, value: Vec<u8>) -> Result<(), TrieError> {
        let path = Nibbles::from_bytes(key);
        let mut root = std::mem::replace(&mut self.root, NodeHandle::Hash(EMPTY_TRIE_ROOT));
        let result = self.insert_at(&mut root, &path.0, value, 0);
        self.root = root;
        result
    }

    fn insert_at(
        &self,
        handle: &mut NodeHandle,
        path: &[u8],
        value: Vec<u8>,
        depth: usize,
    ) -> Result<(), TrieError> {
        self.check_depth(depth)?;
        let node = self.make_mut(handle)?;

        let replacement = match node {
            TrieNode::Empty => TrieNode::Leaf {
                path: Nibbles(path.to_vec()),
                value,
            },

            TrieNode::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path.0.as_slice() == path {
                    *leaf_value = value;
                    return Ok(());
                }
                let common = common_prefix(&leaf_path.0, path);
                if common >= leaf_path.len() || common >= path.len() {
                    return Err(TrieError::MalformedNode("leaf path length mismatch".into()));
                }
                let existing = TrieNode::Leaf {
                    path: leaf_path.slice(common + 1),
                    value: std::mem::take(leaf_value),
                };
                let inserted = TrieNode::Leaf {
                    path: Nibbles(path[common + 1..].to_vec()),
                    value,
                };
                let branch = branch_of(
                    (leaf_path.at(common), NodeHandle::InMemory(Box::new(existing))),
                    (path[common], NodeHandle::InMemory(Box::new(inserted))),
                );
                with_prefix(Nibbles(path[..common].to_vec()), branch)
            }

            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix(&ext_path.0, path);
                if common == ext_path.len() {
                    return self.insert_at(child, &path[common..], value, depth + common);
                }
                if common >= path.len() {
                    return Err(TrieError::MalformedNode("extension path too long".into()));
                }
                let old_child = std::mem::replace(child, NodeHandle::Hash(EMPTY_TRIE_ROOT));
                let ext_rest = ext_path.slice(common + 1);
                let ext_side = if ext_rest.is_empty() {
                    old_child
                } else {
                    NodeHandle::InMemory(Box::new(TrieNode::Extension {
                        path: ext_rest,
                        child: old_child,
                    }))
                };
                let inserted = TrieNode::Leaf {
                    path: Nibbles(path[common + 1..].to_vec()),
                    value,
                };
                let branch = branch_of(
                    (ext_path.at(common), ext_side),
                    (path[common], NodeHandle::InMemory(Box::new(inserted))),
                );
                with_prefix(ext_path.slice_range(0, common), branch)
            }

            TrieNode::Branch { children } => {
                let Some((&nibble, rest)) = path.split_first() else {
                    return Err(TrieError::MalformedNode("key terminates at branch".into()));
                };
                let slot = &mut children[nibble as usize];
                if let Some(child) = slot {
                    return self.insert_at(child, rest, value, depth + 1);
                }
                *slot = Some(NodeHandle::InMemory(Box::new(TrieNode::Leaf {
                    path: Nibbles(rest.to_vec()),
                    value,
                })));
                return Ok(());
            }
        };

        *node = replacement;
        Ok(())
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn remove(&mut self, key: &TrieKey) -> Result<bool, TrieError> {
        let path = Nibbles::from_bytes(key);
        let mut root = std::mem::replace(&mut self.root, NodeHandle::Hash(EMPTY_TRIE_ROOT));
        let result = self.remove_at(&mut root, &path.0, 0);
        self.root = root;
        result
    }

    fn remove_at(
        &self,
        handle: &mut NodeHandle,
        path: &[u8],
        depth: usize,
    ) -> Result<bool, TrieError> {
        self.check_depth(depth)?;
        let node = self.make_mut(handle)?;

        let replacement = match node {
            TrieNode::Empty => return Ok(false),

            TrieNode::Leaf {
                path: leaf_path, ..
            } => {
                if leaf_path.0.as_slice() != path {
                    return Ok(false);
                }
                TrieNode::Empty
            }

            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                if !path.starts_with(&ext_path.0) {
                    return Ok(false);
                }
                let consumed = ext_path.len();
                if !self.remove_at(child, &path[consumed..], depth + consumed)? {
                    return Ok(false);
                }
                // The child was a branch; after removal it may have collapsed.
                let NodeHandle::InMemory(child_node) = child else {
                    return Ok(true);
                };
                match std::mem::replace(child_node.as_mut(), TrieNode::Empty) {
                    TrieNode::Empty => TrieNode::Empty,
                    TrieNode::Leaf { path: tail, value } => TrieNode::Leaf {
                        path: ext_path.join(None, &tail),
                        value,
                    },
                    TrieNode::Extension {
                        path: tail,
                        child: grandchild,
                    } => TrieNode::Extension {
                        path: ext_path.join(None, &tail),
                        child: grandchild,
                    },
                    branch @ TrieNode::Branch { .. } => {
                        **child_node = branch;
                        return Ok(true);
                    }
                }
            }

            TrieNode::Branch { children } => {
                let Some((&nibble, rest)) = path.split_first() else {
                    return Ok(false);
                };
                let idx = nibble as usize;
                if children[idx].is_none() {
                    return Ok(false);
                }

                // Load the sibling up front so a collapse never needs I/O.
                if children.iter().flatten().count() == 2 {
                    let sibling = children
                        .iter_mut()
                        .enumerate()
                        .find(|(i, c)| *i != idx && c.is_some())
                        .and_then(|(_, c)| c.as_mut());
                    if let Some(sibling) = sibling {
                        self.make_mut(sibling)?;
                    }
                }

                let Some(child) = children[idx].as_mut() else {
                    return Ok(false);
                };
                if !self.remove_at(child, rest, depth + 1)? {
                    return Ok(false);
                }
                if matches!(child, NodeHandle::InMemory(n) if matches!(**n, TrieNode::Empty)) {
                    children[idx] = None;
                }

                let mut remaining = children
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(i, c)| c.as_mut().map(|c| (i, c)));
                let (only_idx, only) = match (remaining.next(), remaining.next()) {
                    (None, _) => (0, None),
                    (Some((i, c)), None) => (i, Some(c)),
                    (Some(_), Some(_)) => return Ok(true),
                };
                match only {
                    None => TrieNode::Empty,
                    Some(only) => {
                        let only_node = self.make_mut(only)?;
                        let lead = Nibbles(vec![only_idx as u8]);
                        match std::mem::replace(only_node, TrieNode::Empty) {
                            TrieNode::Leaf { path: tail, value } => TrieNode::Leaf {
                                path: lead.join(None, &tail),
                                value,
                            },
                            TrieNode::Extension {
                                path: tail,
                                child: grandchild,
                            } => TrieNode::Extension {
                                path: lead.join(None, &tail),
                                child: grandchild,
                            },
                            other => TrieNode::Extension {
                                path: lead,
                                child: NodeHandle::InMemory(Box::new(other)),
                            },
                        }
                    }
                }
            }
        };

        *node = replacement;
        Ok(true)
    }

    /// Persist every in-memory node and return the root hash.
    pub fn commit(&mut self) -> Result<Hash, TrieError> {
        let mut batch = Vec::new();
        let root = collect_dirty(&self.root, &mut batch);
        if !batch.is_empty() {
            self.db.batch_put(batch)?;
        }
        if root != EMPTY_TRIE_ROOT {
            self.root = NodeHandle::Hash(root);
        }
        Ok(root)
    }

    // =========================================================================
    // NODE RESOLUTION
    // =========================================================================

    fn load(&self, hash: &Hash) -> Result<TrieNode, TrieError> {
        if *hash == EMPTY_TRIE_ROOT {
            return Ok(TrieNode::Empty);
        }
        let bytes = self
            .db
            .get_node(hash)?
            .ok_or(TrieError::MissingNode(*hash))?;
        TrieNode::decode(&bytes)
    }

    fn resolve<'a>(&self, handle: &'a NodeHandle) -> Result<Cow<'a, TrieNode>, TrieError> {
        match handle {
            NodeHandle::InMemory(node) => Ok(Cow::Borrowed(node.as_ref())),
            NodeHandle::Hash(hash) => self.load(hash).map(Cow::Owned),
        }
    }

    fn resolve_owned(&self, handle: NodeHandle) -> Result<TrieNode, TrieError> {
        match handle {
            NodeHandle::InMemory(node) => Ok(*node),
            NodeHandle::Hash(hash) => self.load(&hash),
        }
    }

    /// Bring the referenced node into memory for mutation.
    fn make_mut<'a>(&self, handle: &'a mut NodeHandle) -> Result<&'a mut TrieNode, TrieError> {
        if let NodeHandle::Hash(hash) = handle {
            let node = self.load(hash)?;
            *handle = NodeHandle::InMemory(Box::new(node));
        }
        match handle {
            NodeHandle::InMemory(node) => Ok(node.as_mut()),
            NodeHandle::Hash(_) => unreachable!("handle loaded above"),
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), TrieError> {
        if depth > self.max_depth {
            return Err(TrieError::DepthExceeded {
                max: self.max_depth,
            });
        }
        Ok(())
    }
}

/// Serialize every in-memory node below `handle` into `batch`.
fn collect_dirty(handle: &NodeHandle, batch: &mut Vec<(Hash, Vec<u8>)>) -> Hash {
    let node = match handle {
        NodeHandle::Hash(h) => return *h,
        NodeHandle::InMemory(node) => node,
    };
    match node.as_ref() {
        TrieNode::Empty => return EMPTY_TRIE_ROOT,
        TrieNode::Leaf { .. } => {}
        TrieNode::Extension { child, .. } => {
            collect_dirty(child, batch);
        }
        TrieNode::Branch { children } => {
            for child in children.iter().flatten() {
                collect_dirty(child, batch);
            }
        }
    }
    let encoded = node.rlp_encode();
    let hash = keccak256(&encoded);
    batch.push((hash, encoded));
    hash
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn branch_of(a: (u8, NodeHandle), b: (u8, NodeHandle)) -> TrieNode {
    let mut children: [Option<NodeHandle>; 16] = std::array::from_fn(|_| None);
    children[a.0 as usize] = Some(a.1);
    children[b.0 as usize] = Some(b.1);
    TrieNode::Branch {
        children: Box::new(children),
    }
}

fn with_prefix(prefix: Nibbles, branch: TrieNode) -> TrieNode {
    if prefix.is_empty() {
        branch
    } else {
        TrieNode::Extension {
            path: prefix,
            child: NodeHandle::InMemory(Box::new(branch)),
        }
    }
}

fn to_key(path: &Nibbles) -> Result<TrieKey, TrieError> {
    path.to_bytes()
        .and_then(|bytes| TrieKey::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| TrieError::MalformedNode(format!("leaf path of {} nibbles", path.len())))
}

// =============================================================================
// ORDERED ITERATOR
// =============================================================================

/// Depth-first, ascending iterator over trie entries.
pub struct TrieIter<'a> {
    trie: &'a MerkleTrie,
    stack: Vec<(Nibbles, Cow<'a, NodeHandle>)>,
}

impl<'a> TrieIter<'a> {
    fn push_children(&mut self, prefix: &Nibbles, node: Cow<'a, TrieNode>) {
        match node {
            Cow::Borrowed(node) => match node {
                TrieNode::Extension { path, child } => {
                    self.stack.push((prefix.join(None, path), Cow::Borrowed(child)));
                }
                TrieNode::Branch { children } => {
                    for (i, child) in children.iter().enumerate().rev() {
                        if let Some(child) = child {
                            self.stack
                                .push((prefix.join(Some(i as u8), &Nibbles::default()), Cow::Borrowed(child)));
                        }
                    }
                }
                _ => {}
            },
            Cow::Owned(node) => match node {
                TrieNode::Extension { path, child } => {
                    self.stack.push((prefix.join(None, &path), Cow::Owned(child)));
                }
                TrieNode::Branch { children } => {
                    let children: [Option<NodeHandle>; 16] = *children;
                    for (i, child) in children.into_iter().enumerate().rev() {
                        if let Some(child) = child {
                            self.stack
                                .push((prefix.join(Some(i as u8), &Nibbles::default()), Cow::Owned(child)));
                        }
                    }
                }
                _ => {}
            },
        }
    }
}

impl<'a> Iterator for TrieIter<'a> {
    type Item = Result<TrieEntry, TrieError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((prefix, handle)) = self.stack.pop() {
            if let Err(e) = self.trie.check_depth(prefix.len()) {
                self.stack.clear();
                return Some(Err(e));
            }
            let node = match handle {
                Cow::Borrowed(handle) => self.trie.resolve(handle),
                Cow::Owned(handle) => self.trie.resolve_owned(handle).map(Cow::Owned),
            };
            let node = match node {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            if let TrieNode::Leaf { path, value } = node.as_ref() {
                let entry = to_key(&prefix.join(None, path)).map(|key| (key, value.clone()));
                if entry.is_err() {
                    self.stack.clear();
                }
                return Some(entry);
            }
            self.push_children(&prefix, node);
        }
        None
    }
}
