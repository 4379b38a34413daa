//! RFC 6962 Merkle tree over event hashes.
//!
//! Leaves are hashed as `SHA-256(0x00 || data)` and interior nodes as
//! `SHA-256(0x01 || left || right)`. A tree of `n > 1` leaves splits at the
//! largest power of two strictly below `n`, so no padding leaves are ever
//! introduced and every earlier tree size stays provably a prefix of the
//! current one.

use crate::error::LedgerError;
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n` (requires `n > 1`).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

/// Merkle tree hash of a run of leaf hashes.
fn mth(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Sha256::digest(b"").into(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
        }
    }
}

fn audit_path(m: usize, leaves: &[Hash], out: &mut Vec<Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if m < k {
        audit_path(m, &leaves[..k], out);
        out.push(mth(&leaves[k..]));
    } else {
        audit_path(m - k, &leaves[k..], out);
        out.push(mth(&leaves[..k]));
    }
}

fn subproof(m: usize, leaves: &[Hash], complete: bool, out: &mut Vec<Hash>) {
    let n = leaves.len();
    if m == n {
        if !complete {
            out.push(mth(leaves));
        }
        return;
    }
    let k = split_point(n);
    if m <= k {
        subproof(m, &leaves[..k], complete, out);
        out.push(mth(&leaves[k..]));
    } else {
        subproof(m - k, &leaves[k..], false, out);
        out.push(mth(&leaves[..k]));
    }
}

/// Leaf hashes plus the roots of the complete power-of-two subtrees
/// ("peaks") covering them, largest first. Appending touches only the
/// peaks, and the current root is a right fold over them.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    leaves: Vec<Hash>,
    peaks: Vec<Hash>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw leaf data and return its index.
    pub fn push(&mut self, data: &[u8]) -> u64 {
        let leaf = leaf_hash(data);
        self.leaves.push(leaf);

        // One merge per trailing zero bit of the new size.
        let mut acc = leaf;
        let mut n = self.leaves.len();
        while n & 1 == 0 {
            if let Some(left) = self.peaks.pop() {
                acc = node_hash(&left, &acc);
            }
            n >>= 1;
        }
        self.peaks.push(acc);

        (self.leaves.len() - 1) as u64
    }

    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaf(&self, index: u64) -> Option<Hash> {
        self.leaves.get(index as usize).copied()
    }

    pub fn root(&self) -> Hash {
        let mut peaks = self.peaks.iter().rev();
        let Some(last) = peaks.next() else {
            return Sha256::digest(b"").into();
        };
        peaks.fold(*last, |acc, peak| node_hash(peak, &acc))
    }

    /// Root of the tree as it was when it held `size` leaves.
    pub fn root_at(&self, size: u64) -> Result<Hash, LedgerError> {
        if size > self.len() {
            return Err(LedgerError::IndexOutOfRange { index: size, size: self.len() });
        }
        Ok(mth(&self.leaves[..size as usize]))
    }

    /// Number of levels above the leaves.
    pub fn height(&self) -> u32 {
        let n = self.len();
        if n <= 1 { 0 } else { u64::BITS - (n - 1).leading_zeros() }
    }

    /// Audit path for the leaf at `index`, ordered from the leaf upwards.
    pub fn inclusion_proof(&self, index: u64) -> Result<Vec<Hash>, LedgerError> {
        if index >= self.len() {
            return Err(LedgerError::IndexOutOfRange { index, size: self.len() });
        }
        let mut path = Vec::with_capacity(self.height() as usize);
        audit_path(index as usize, &self.leaves, &mut path);
        Ok(path)
    }

    /// Proof that the tree at `old_size` is a prefix of the current tree.
    pub fn consistency_proof(&self, old_size: u64) -> Result<Vec<Hash>, LedgerError> {
        if old_size == 0 || old_size > self.len() {
            return Err(LedgerError::InvalidConsistencyRange { old_size, size: self.len() });
        }
        let mut path = Vec::new();
        subproof(old_size as usize, &self.leaves, true, &mut path);
        Ok(path)
    }
}

/// Check an audit path for `leaf` (already leaf-hashed) against `root`.
pub fn verify_inclusion(leaf: &Hash, index: u64, tree_size: u64, path: &[Hash], root: &Hash) -> bool {
    if index >= tree_size {
        return false;
    }

    let mut f = index;
    let mut s = tree_size - 1;
    let mut r = *leaf;

    for p in path {
        if s == 0 {
            return false;
        }
        if f & 1 == 1 || f == s {
            r = node_hash(p, &r);
            while f & 1 == 0 && f != 0 {
                f >>= 1;
                s >>= 1;
            }
        } else {
            r = node_hash(&r, p);
        }
        f >>= 1;
        s >>= 1;
    }

    s == 0 && r == *root
}

/// Check that `old_root` (size `old_size`) is a prefix of `new_root` (size `new_size`).
pub fn verify_consistency(
    old_size: u64,
    new_size: u64,
    old_root: &Hash,
    new_root: &Hash,
    path: &[Hash],
) -> bool {
    if old_size == 0 || old_size > new_size {
        return false;
    }
    if old_size == new_size {
        return path.is_empty() && old_root == new_root;
    }
    if path.is_empty() {
        return false;
    }

    let mut nodes = Vec::with_capacity(path.len() + 1);
    if old_size.is_power_of_two() {
        nodes.push(*old_root);
    }
    nodes.extend_from_slice(path);

    let mut f = old_size - 1;
    let mut s = new_size - 1;
    while f & 1 == 1 {
        f >>= 1;
        s >>= 1;
    }

    let mut fr = nodes[0];
    let mut sr = nodes[0];

    for c in &nodes[1..] {
        if s == 0 {
            return false;
        }
        if f & 1 == 1 || f == s {
            fr = node_hash(c, &fr);
            sr = node_hash(c, &sr);
            while f & 1 == 0 && f != 0 {
                f >>= 1;
                s >>= 1;
            }
        } else {
            sr = node_hash(&sr, c);
        }
        f >>= 1;
        s >>= 1;
    }

    fr == *old_root && sr == *new_root && s == 0
}
