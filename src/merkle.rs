//! Fixed-depth sparse Merkle accumulator.
//!
//! Leaves that were never written hold [`Hash::ZERO`]; internal nodes that
//! were never touched are the precomputed all-zero subtree hashes, so only
//! written paths occupy memory or storage. Children are combined with the
//! Poseidon hash, left child first. Bit `l` of the index selects the side at
//! level `l` (level 0 is the leaf level).
//!
//! Store layout (one namespace per tree):
//!
//! | key                      | value                     |
//! |--------------------------|---------------------------|
//! | `depth`                  | tree depth, decimal       |
//! | `root`                   | root hash                 |
//! | `leaf:<index>`           | leaf hash                 |
//! | `node:<level>:<position>`| internal node hash        |

use crate::error::AccumulatorError;
use crate::store::KeyValueStore;
use crate::types::Hash;
use crate::utils::poseidon_hash;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Depth used by the club tree and the binaries: 256 members.
pub const TREE_DEPTH: usize = 8;

const DEPTH_KEY: &str = "depth";
const ROOT_KEY: &str = "root";
const LEAF_PREFIX: &str = "leaf:";
const NODE_PREFIX: &str = "node:";

pub type AccumulatorResult<T> = std::result::Result<T, AccumulatorError>;

#[inline]
fn hash_children(left: Hash, right: Hash) -> Hash {
    Hash::from_field(poseidon_hash(left.to_field(), right.to_field()))
}

/// Node values along the path of `index`, from the leaf (first) to the root
/// (last). Used by both `update` and proof verification.
fn path_hashes(leaf: Hash, index: u64, siblings: &[Hash]) -> Vec<Hash> {
    let mut path = Vec::with_capacity(siblings.len() + 1);
    let mut current = leaf;
    path.push(current);
    for (level, sibling) in siblings.iter().enumerate() {
        let is_right = position_at(index, level) & 1 == 1;
        current = if is_right {
            hash_children(*sibling, current)
        } else {
            hash_children(current, *sibling)
        };
        path.push(current);
    }
    path
}

#[inline]
fn position_at(index: u64, level: usize) -> u64 {
    index.checked_shr(level as u32).unwrap_or(0)
}

/// Root obtained by folding `siblings` onto `leaf` along `index`.
#[must_use]
pub fn fold_path(leaf: Hash, index: u64, siblings: &[Hash]) -> Hash {
    path_hashes(leaf, index, siblings).pop().unwrap_or(leaf)
}

/// Returns `true` when `index` addresses a leaf of a depth-`depth` tree.
#[must_use]
pub fn index_in_range(index: u64, depth: usize) -> bool {
    depth >= 64 || index < (1u64 << depth)
}

fn zero_hashes(depth: usize) -> Vec<Hash> {
    let mut zeros = Vec::with_capacity(depth + 1);
    let mut current = Hash::ZERO;
    zeros.push(current);
    for _ in 0..depth {
        current = hash_children(current, current);
        zeros.push(current);
    }
    zeros
}

/// Inclusion witness for one leaf, carrying the root it was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleProof<const DEPTH: usize = TREE_DEPTH> {
    pub root: Hash,
    pub index: u64,
    pub siblings: [Hash; DEPTH],
}

/// JSON wire form of a [`MerkleProof`].
///
/// `root` and `siblings` accept hex or decimal strings; `index` is decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProofJson {
    pub root: String,
    pub index: String,
    pub siblings: Vec<String>,
}

impl<const DEPTH: usize> MerkleProof<DEPTH> {
    /// Root implied by `leaf` at this proof's index and siblings.
    #[must_use]
    pub fn compute_root(&self, leaf: Hash) -> Hash {
        fold_path(leaf, self.index, &self.siblings)
    }

    /// Checks that `leaf` is included under `root`.
    #[must_use]
    pub fn verify(&self, root: Hash, leaf: Hash) -> bool {
        self.compute_root(leaf) == root
    }

    /// Fails with [`AccumulatorError::StaleRoot`] if the proof was computed
    /// against a root other than `current_root`.
    pub fn ensure_current(&self, current_root: Hash) -> AccumulatorResult<()> {
        if self.root != current_root {
            return Err(AccumulatorError::StaleRoot {
                expected: current_root.to_string(),
                actual: self.root.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn to_json(&self) -> MerkleProofJson {
        MerkleProofJson {
            root: self.root.to_string(),
            index: self.index.to_string(),
            siblings: self.siblings.iter().map(Hash::to_string).collect(),
        }
    }

    /// Decodes the wire form. The sibling count must equal `DEPTH` exactly.
    pub fn from_json(json: &MerkleProofJson) -> AccumulatorResult<Self> {
        if json.siblings.len() != DEPTH {
            return Err(AccumulatorError::InvalidEncoding(format!(
                "expected {} siblings, got {}",
                DEPTH,
                json.siblings.len()
            )));
        }

        let root = parse_hash(&json.root, "root")?;
        let index: u64 = json.index.trim().parse().map_err(|_| {
            AccumulatorError::InvalidEncoding(format!("invalid proof index '{}'", json.index))
        })?;
        if !index_in_range(index, DEPTH) {
            return Err(AccumulatorError::IndexOutOfRange {
                index,
                depth: DEPTH,
            });
        }

        let mut siblings = [Hash::ZERO; DEPTH];
        for (slot, encoded) in siblings.iter_mut().zip(&json.siblings) {
            *slot = parse_hash(encoded, "sibling")?;
        }

        Ok(Self {
            root,
            index,
            siblings,
        })
    }
}

impl<const DEPTH: usize> fmt::Display for MerkleProof<DEPTH> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleProof:\n  Root: {}\n  Index: {}\n  Siblings: {}",
            self.root, self.index, DEPTH
        )
    }
}

fn parse_hash(encoded: &str, what: &str) -> AccumulatorResult<Hash> {
    encoded
        .parse()
        .map_err(|e| AccumulatorError::InvalidEncoding(format!("{what}: {e}")))
}

fn parse_stored_hash(key: &str, value: &[u8]) -> AccumulatorResult<Hash> {
    let s = std::str::from_utf8(value).map_err(|_| {
        AccumulatorError::InvalidEncoding(format!("store entry '{key}' is not UTF-8"))
    })?;
    parse_hash(s, key)
}

/// Parses a `leaf:<i>` or `node:<l>:<p>` key into `(level, position)`.
/// Other keys yield `Ok(None)`.
fn parse_node_key(key: &str) -> AccumulatorResult<Option<(usize, u64)>> {
    let invalid = || AccumulatorError::InvalidEncoding(format!("malformed store key '{key}'"));

    if let Some(index) = key.strip_prefix(LEAF_PREFIX) {
        let index = index.parse().map_err(|_| invalid())?;
        return Ok(Some((0, index)));
    }
    if let Some(rest) = key.strip_prefix(NODE_PREFIX) {
        let (level, position) = rest.split_once(':').ok_or_else(invalid)?;
        let level = level.parse().map_err(|_| invalid())?;
        let position = position.parse().map_err(|_| invalid())?;
        return Ok(Some((level, position)));
    }
    Ok(None)
}

fn node_key(level: usize, position: u64) -> String {
    if level == 0 {
        format!("{LEAF_PREFIX}{position}")
    } else {
        format!("{NODE_PREFIX}{level}:{position}")
    }
}

/// Sparse Merkle tree of fixed depth over a [`KeyValueStore`].
///
/// Not safe for concurrent updates; `update` takes `&mut self` and callers
/// keep a single writer per store namespace.
#[derive(Debug)]
pub struct MerkleTree<S: KeyValueStore, const DEPTH: usize = TREE_DEPTH> {
    store: S,
    nodes: HashMap<(usize, u64), Hash>,
    zeros: Vec<Hash>,
    root: Hash,
}

impl<S: KeyValueStore, const DEPTH: usize> MerkleTree<S, DEPTH> {
    /// Creates an all-zero tree. Nothing is written until the first update.
    pub fn build(mut store: S) -> AccumulatorResult<Self> {
        if !store.is_open() {
            store.open()?;
        }
        let zeros = zero_hashes(DEPTH);
        let root = zeros[DEPTH];
        info!("Built empty tree of depth {DEPTH}, root {root}");
        Ok(Self {
            store,
            nodes: HashMap::new(),
            zeros,
            root,
        })
    }

    /// Restores a tree previously persisted in `store`.
    ///
    /// # Errors
    ///
    /// - [`AccumulatorError::NotFound`] if the store holds no tree
    /// - [`AccumulatorError::InvalidEncoding`] on a depth mismatch, a
    ///   malformed entry, or cached nodes that do not hash to the stored root
    pub fn import(mut store: S) -> AccumulatorResult<Self> {
        if !store.is_open() {
            store.open()?;
        }
        let zeros = zero_hashes(DEPTH);
        match Self::load_nodes(&store, &zeros)? {
            Some((nodes, root)) => Ok(Self::restored(store, nodes, zeros, root)),
            None => Err(AccumulatorError::NotFound),
        }
    }

    /// Imports the stored tree, or builds an empty one if the store is empty.
    pub fn load_or_build(mut store: S) -> AccumulatorResult<Self> {
        if !store.is_open() {
            store.open()?;
        }
        let zeros = zero_hashes(DEPTH);
        match Self::load_nodes(&store, &zeros)? {
            Some((nodes, root)) => Ok(Self::restored(store, nodes, zeros, root)),
            None => {
                debug!("No stored tree found, building an empty one");
                Self::build(store)
            }
        }
    }

    fn restored(
        store: S,
        nodes: HashMap<(usize, u64), Hash>,
        zeros: Vec<Hash>,
        root: Hash,
    ) -> Self {
        info!(
            "Imported tree of depth {DEPTH} ({} cached nodes), root {root}",
            nodes.len()
        );
        Self {
            store,
            nodes,
            zeros,
            root,
        }
    }

    fn load_nodes(
        store: &S,
        zeros: &[Hash],
    ) -> AccumulatorResult<Option<(HashMap<(usize, u64), Hash>, Hash)>> {
        let depth = store.get(DEPTH_KEY)?;
        let root = store.get(ROOT_KEY)?;
        let (depth, root) = match (depth, root) {
            (None, None) => return Ok(None),
            (Some(depth), Some(root)) => (depth, root),
            _ => {
                return Err(AccumulatorError::InvalidEncoding(
                    "store holds only one of depth/root".into(),
                ))
            }
        };

        let stored_depth: usize = std::str::from_utf8(&depth)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| AccumulatorError::InvalidEncoding("unreadable stored depth".into()))?;
        if stored_depth != DEPTH {
            return Err(AccumulatorError::InvalidEncoding(format!(
                "stored tree has depth {stored_depth}, expected {DEPTH}"
            )));
        }
        let root = parse_stored_hash(ROOT_KEY, &root)?;

        let mut nodes = HashMap::new();
        for (key, value) in store.iter()? {
            let Some((level, position)) = parse_node_key(&key)? else {
                continue;
            };
            if level > DEPTH || !index_in_range(position, DEPTH - level) {
                return Err(AccumulatorError::InvalidEncoding(format!(
                    "store key '{key}' is outside a depth-{DEPTH} tree"
                )));
            }
            nodes.insert((level, position), parse_stored_hash(&key, &value)?);
        }

        // Updates always write a full path, so every stored node below the
        // root has a stored parent.
        for &(level, position) in nodes.keys() {
            if level < DEPTH && !nodes.contains_key(&(level + 1, position >> 1)) {
                return Err(AccumulatorError::InvalidEncoding(format!(
                    "stored node {} has no stored parent",
                    node_key(level, position)
                )));
            }
        }

        let lookup = |level: usize, position: u64| {
            nodes
                .get(&(level, position))
                .copied()
                .unwrap_or(zeros[level])
        };
        for (&(level, position), &value) in &nodes {
            if level == 0 {
                continue;
            }
            let expected = hash_children(
                lookup(level - 1, position * 2),
                lookup(level - 1, position * 2 + 1),
            );
            if expected != value {
                return Err(AccumulatorError::InvalidEncoding(format!(
                    "stored node {} does not match its children",
                    node_key(level, position)
                )));
            }
        }
        if lookup(DEPTH, 0) != root {
            return Err(AccumulatorError::InvalidEncoding(
                "stored root does not match stored nodes".into(),
            ));
        }

        Ok(Some((nodes, root)))
    }

    fn check_index(index: u64) -> AccumulatorResult<()> {
        if !index_in_range(index, DEPTH) {
            return Err(AccumulatorError::IndexOutOfRange {
                index,
                depth: DEPTH,
            });
        }
        Ok(())
    }

    fn node(&self, level: usize, position: u64) -> Hash {
        self.nodes
            .get(&(level, position))
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn siblings_of(
        &self,
        index: u64,
        pending: &HashMap<(usize, u64), Hash>,
    ) -> [Hash; DEPTH] {
        std::array::from_fn(|level| {
            let position = position_at(index, level) ^ 1;
            pending
                .get(&(level, position))
                .copied()
                .unwrap_or_else(|| self.node(level, position))
        })
    }

    /// Sets leaf `index` to `value` and recomputes its path to the root.
    ///
    /// The leaf, the path nodes and the new root are written in a single
    /// batch before the in-memory tree changes; a storage failure leaves
    /// both the store and the tree on the previous root.
    pub fn update(&mut self, index: u64, value: Hash) -> AccumulatorResult<()> {
        self.update_many([(index, value)])
    }

    /// Applies several leaf updates and persists them in one batch.
    pub fn update_many<I>(&mut self, leaves: I) -> AccumulatorResult<()>
    where
        I: IntoIterator<Item = (u64, Hash)>,
    {
        let mut pending: HashMap<(usize, u64), Hash> = HashMap::new();
        let mut root = self.root;
        let mut count = 0usize;

        for (index, value) in leaves {
            Self::check_index(index)?;
            let siblings = self.siblings_of(index, &pending);
            let path = path_hashes(value, index, &siblings);
            for (level, hash) in path.iter().enumerate() {
                pending.insert((level, position_at(index, level)), *hash);
            }
            root = path[DEPTH];
            count += 1;
            debug!("Staged leaf {index} = {value}");
        }

        if count == 0 {
            return Ok(());
        }

        let mut batch: Vec<(String, Vec<u8>)> = pending
            .iter()
            .map(|(&(level, position), hash)| {
                (node_key(level, position), hash.to_string().into_bytes())
            })
            .collect();
        batch.push((ROOT_KEY.to_string(), root.to_string().into_bytes()));
        batch.push((DEPTH_KEY.to_string(), DEPTH.to_string().into_bytes()));
        self.store.set_batch(batch)?;

        self.nodes.extend(pending);
        self.root = root;
        debug!("Applied {count} leaf update(s), new root {root}");
        Ok(())
    }

    /// Inclusion proof for `index` against the current root.
    pub fn prove(&self, index: u64) -> AccumulatorResult<MerkleProof<DEPTH>> {
        Self::check_index(index)?;
        Ok(MerkleProof {
            root: self.root,
            index,
            siblings: self.siblings_of(index, &HashMap::new()),
        })
    }

    /// Current value of leaf `index` (zero if never written).
    pub fn leaf(&self, index: u64) -> AccumulatorResult<Hash> {
        Self::check_index(index)?;
        Ok(self.node(0, index))
    }

    #[must_use]
    pub fn root(&self) -> Hash {
        self.root
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        DEPTH
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Releases the tree and hands back its store.
    pub fn into_store(self) -> S {
        self.store
    }
}
