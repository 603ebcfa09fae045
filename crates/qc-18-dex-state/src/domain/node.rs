use super::{codec::keccak256, nibbles::Nibbles, Hash, TrieError, EMPTY_TRIE_ROOT};
use rlp::{Rlp, RlpStream};

// =============================================================================
// TRIE NODE: The node types in MPT
// =============================================================================

/// Reference from a parent node to a child.
///
/// Children start out as hashes of persisted nodes and become `InMemory`
/// once a mutation touches them. Commit turns them back into hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeHandle {
    /// Persisted child, resolved through the trie database.
    Hash(Hash),
    /// Loaded or dirty child.
    InMemory(Box<TrieNode>),
}

impl NodeHandle {
    /// Hash of the referenced node (recomputed for in-memory children).
    pub fn hash(&self) -> Hash {
        match self {
            NodeHandle::Hash(h) => *h,
            NodeHandle::InMemory(node) => node.hash(),
        }
    }
}

/// Node types in the Patricia Merkle Trie.
///
/// Keys have a fixed width, so no key ever terminates inside a branch and
/// branches carry no value slot of their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    /// Empty node (null reference, hash = EMPTY_TRIE_ROOT).
    Empty,

    /// Leaf node: stores remaining key path and the value.
    /// RLP: [hex_prefix_encode(path, true), value]
    Leaf {
        /// Remaining path from current position to this leaf.
        path: Nibbles,
        /// Encoded value.
        value: Vec<u8>,
    },

    /// Extension node: shared prefix optimization.
    /// RLP: [hex_prefix_encode(path, false), child_hash]
    Extension {
        /// Shared prefix path.
        path: Nibbles,
        /// Child node (always a branch).
        child: NodeHandle,
    },

    /// Branch node: 16-way branch for each nibble value.
    /// RLP: \[child\[0\], ..., child\[15\], ""\]
    Branch {
        /// 16 child nodes (None = empty).
        children: Box<[Option<NodeHandle>; 16]>,
    },
}

impl TrieNode {
    /// Branch with no children.
    pub fn empty_branch() -> Self {
        TrieNode::Branch {
            children: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// RLP-encode this node for hashing and storage.
    ///
    /// Children are always referenced by hash.
    pub fn rlp_encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Empty => vec![0x80], // RLP empty string

            TrieNode::Leaf { path, value } => {
                let mut s = RlpStream::new_list(2);
                s.append(&path.encode_hex_prefix(true));
                s.append(value);
                s.out().to_vec()
            }

            TrieNode::Extension { path, child } => {
                let mut s = RlpStream::new_list(2);
                s.append(&path.encode_hex_prefix(false));
                s.append(&child.hash().to_vec());
                s.out().to_vec()
            }

            TrieNode::Branch { children } => {
                let mut s = RlpStream::new_list(17);
                for child in children.iter() {
                    match child {
                        Some(handle) => s.append(&handle.hash().to_vec()),
                        None => s.append_empty_data(),
                    };
                }
                s.append_empty_data();
                s.out().to_vec()
            }
        }
    }

    /// Decode a node read back from the trie database.
    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return if rlp.is_empty() {
                Ok(TrieNode::Empty)
            } else {
                Err(TrieError::MalformedNode("node is not a list".into()))
            };
        }

        match rlp.item_count()? {
            2 => {
                let (path, is_leaf) = Nibbles::decode_hex_prefix(rlp.at(0)?.data()?)?;
                let payload = rlp.at(1)?.data()?;
                if is_leaf {
                    Ok(TrieNode::Leaf {
                        path,
                        value: payload.to_vec(),
                    })
                } else {
                    if path.is_empty() {
                        return Err(TrieError::MalformedNode("empty extension path".into()));
                    }
                    Ok(TrieNode::Extension {
                        path,
                        child: NodeHandle::Hash(to_hash(payload)?),
                    })
                }
            }
            17 => {
                let mut children: [Option<NodeHandle>; 16] = std::array::from_fn(|_| None);
                for (i, slot) in children.iter_mut().enumerate() {
                    let item = rlp.at(i)?;
                    if !item.is_empty() {
                        *slot = Some(NodeHandle::Hash(to_hash(item.data()?)?));
                    }
                }
                Ok(TrieNode::Branch {
                    children: Box::new(children),
                })
            }
            n => Err(TrieError::MalformedNode(format!("unexpected item count {n}"))),
        }
    }

    /// Compute Keccak256 hash of RLP-encoded node.
    pub fn hash(&self) -> Hash {
        if matches!(self, TrieNode::Empty) {
            return EMPTY_TRIE_ROOT;
        }
        keccak256(&self.rlp_encode())
    }
}

fn to_hash(bytes: &[u8]) -> Result<Hash, TrieError> {
    bytes
        .try_into()
        .map_err(|_| TrieError::MalformedNode(format!("child reference of {} bytes", bytes.len())))
}
