// Copyright (C) 2026 Silo Storage Systems
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use silo_common::consts::{LEAF_SIZE, LEAVES_PER_SECTOR, SECTOR_SIZE};
use silo_common::types::{Hash256, SectorRoot};

/// Domain prefix for hashing a 64-byte leaf.
const LEAF_HASH_PREFIX: [u8; 1] = [0x00];
/// Domain prefix for hashing a pair of child nodes.
const NODE_HASH_PREFIX: [u8; 1] = [0x01];

/// Padding leaf for trees whose leaf count is not a power of two, and the
/// root of an empty tree.
pub const ZERO_HASH: Hash256 = Hash256([0u8; 32]);

lazy_static! {
    /// ZERO_SUBTREES[h] is the root of a height-h subtree whose leaves are
    /// all ZERO_HASH.
    static ref ZERO_SUBTREES: [Hash256; 64] = {
        let mut subtrees = [ZERO_HASH; 64];
        for h in 1..64 {
            subtrees[h] = node_hash(&subtrees[h - 1], &subtrees[h - 1]);
        }
        subtrees
    };
}

pub fn leaf_hash(leaf: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(LEAF_HASH_PREFIX);
    hasher.update(leaf);
    let mut ret = [0u8; 32];
    ret.copy_from_slice(&hasher.finalize());
    Hash256(ret)
}

pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(NODE_HASH_PREFIX);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let mut ret = [0u8; 32];
    ret.copy_from_slice(&hasher.finalize());
    Hash256(ret)
}

fn next_pow2(n: u64) -> u64 {
    n.max(1).next_power_of_two()
}

/// The Merkle root of a 4 MiB sector: a binary tree over its 64-byte
/// leaves. `sector` must be exactly SECTOR_SIZE bytes.
pub fn sector_root(sector: &[u8]) -> SectorRoot {
    debug_assert_eq!(sector.len(), SECTOR_SIZE);

    fn subtree(sector: &[u8], lo: u64, size: u64) -> Hash256 {
        if size == 1 {
            let off = (lo as usize) * LEAF_SIZE;
            leaf_hash(&sector[off..off + LEAF_SIZE])
        } else {
            let half = size / 2;
            node_hash(
                &subtree(sector, lo, half),
                &subtree(sector, lo + half, half),
            )
        }
    }
    SectorRoot(subtree(sector, 0, LEAVES_PER_SECTOR).0)
}

/// The root of a list of sector roots: an implicit complete binary tree
/// with the list's next power of two as its leaf count, padded with the
/// zero hash. An empty list is the zero hash.
pub fn meta_root(roots: &[SectorRoot]) -> Hash256 {
    fn subtree(roots: &[SectorRoot], lo: u64, size: u64) -> Hash256 {
        if lo >= roots.len() as u64 {
            return ZERO_SUBTREES[size.trailing_zeros() as usize];
        }
        if size == 1 {
            return Hash256(roots[lo as usize].0);
        }
        let half = size / 2;
        node_hash(
            &subtree(roots, lo, half),
            &subtree(roots, lo + half, half),
        )
    }
    subtree(roots, 0, next_pow2(roots.len() as u64))
}

/// Number of hashes in a range proof for leaves [start, end) of an
/// n-leaf tree.
pub fn range_proof_size(n_leaves: u64, start: u64, end: u64) -> u64 {
    fn inner(lo: u64, size: u64, start: u64, end: u64) -> u64 {
        if start <= lo && lo + size <= end {
            0
        } else if lo + size <= start || end <= lo {
            1
        } else {
            let half = size / 2;
            inner(lo, half, start, end) + inner(lo + half, half, start, end)
        }
    }
    if start >= end {
        return 0;
    }
    inner(0, next_pow2(n_leaves), start, end)
}

/// Root of the subtree covering leaves [lo, lo+size) of the padded tree
/// over `leaves`.
fn subtree_root(leaves: &[Hash256], lo: u64, size: u64) -> Hash256 {
    if lo >= leaves.len() as u64 {
        return ZERO_SUBTREES[size.trailing_zeros() as usize];
    }
    if size == 1 {
        return leaves[lo as usize];
    }
    let half = size / 2;
    node_hash(
        &subtree_root(leaves, lo, half),
        &subtree_root(leaves, lo + half, half),
    )
}

/// Build a range proof for leaves [start, end): the roots of the maximal
/// subtrees outside the range, left to right.
pub fn build_range_proof(leaves: &[Hash256], start: u64, end: u64) -> Vec<Hash256> {
    fn gather(
        leaves: &[Hash256],
        lo: u64,
        size: u64,
        start: u64,
        end: u64,
        proof: &mut Vec<Hash256>,
    ) {
        if start <= lo && lo + size <= end {
            // entirely inside the range; verifier has these leaves
        } else if lo + size <= start || end <= lo {
            proof.push(subtree_root(leaves, lo, size));
        } else {
            let half = size / 2;
            gather(leaves, lo, half, start, end, proof);
            gather(leaves, lo + half, half, start, end, proof);
        }
    }
    let mut proof = vec![];
    if start < end {
        gather(
            leaves,
            0,
            next_pow2(leaves.len() as u64),
            start,
            end,
            &mut proof,
        );
    }
    proof
}

/// Verify a range proof against `root` for an n-leaf tree, where
/// `range_hashes` are the in-range leaf hashes [start, end).
pub fn verify_range_proof(
    root: &Hash256,
    n_leaves: u64,
    start: u64,
    end: u64,
    range_hashes: &[Hash256],
    proof: &[Hash256],
) -> bool {
    fn reconstruct(
        lo: u64,
        size: u64,
        start: u64,
        end: u64,
        range: &mut std::slice::Iter<Hash256>,
        proof: &mut std::slice::Iter<Hash256>,
    ) -> Option<Hash256> {
        if lo + size <= start || end <= lo {
            return proof.next().copied();
        }
        if size == 1 {
            return range.next().copied();
        }
        let half = size / 2;
        let left = reconstruct(lo, half, start, end, range, proof)?;
        let right = reconstruct(lo + half, half, start, end, range, proof)?;
        Some(node_hash(&left, &right))
    }

    if start >= end || (end - start) != range_hashes.len() as u64 {
        return false;
    }
    let mut range_iter = range_hashes.iter();
    let mut proof_iter = proof.iter();
    let Some(computed) = reconstruct(
        0,
        next_pow2(n_leaves),
        start,
        end,
        &mut range_iter,
        &mut proof_iter,
    ) else {
        return false;
    };
    // every hash must have been consumed
    range_iter.next().is_none() && proof_iter.next().is_none() && computed == *root
}

/// Hash every 64-byte leaf of a sector.
fn sector_leaf_hashes(sector: &[u8]) -> Vec<Hash256> {
    sector.chunks(LEAF_SIZE).map(leaf_hash).collect()
}

/// Range proof over the 64-byte leaves of a single sector, for the Read
/// RPC. `start` and `end` are leaf indices.
pub fn build_sector_range_proof(sector: &[u8], start: u64, end: u64) -> Vec<Hash256> {
    build_range_proof(&sector_leaf_hashes(sector), start, end)
}

/// Verify a sector range proof given the raw in-range data.
pub fn verify_sector_range_proof(
    root: &SectorRoot,
    data: &[u8],
    start: u64,
    end: u64,
    proof: &[Hash256],
) -> bool {
    let range_hashes: Vec<Hash256> = data.chunks(LEAF_SIZE).map(leaf_hash).collect();
    verify_range_proof(
        &Hash256(root.0),
        LEAVES_PER_SECTOR,
        start,
        end,
        &range_hashes,
        proof,
    )
}

/// Range proof over a contract's sector-root list, for the SectorRoots
/// RPC.
pub fn build_meta_range_proof(roots: &[SectorRoot], start: u64, end: u64) -> Vec<Hash256> {
    let leaves: Vec<Hash256> = roots.iter().map(|r| Hash256(r.0)).collect();
    build_range_proof(&leaves, start, end)
}

pub fn verify_meta_range_proof(
    root: &Hash256,
    n_roots: u64,
    range: &[SectorRoot],
    start: u64,
    end: u64,
    proof: &[Hash256],
) -> bool {
    let range_hashes: Vec<Hash256> = range.iter().map(|r| Hash256(r.0)).collect();
    verify_range_proof(root, n_roots, start, end, &range_hashes, proof)
}

/// Build a diff proof for the Write RPC: the old subtree hashes covering
/// everything outside the touched leaf indices, plus the old hashes of the
/// touched leaves themselves. `touched` must be sorted and deduplicated.
pub fn build_diff_proof(
    touched: &[u64],
    old_roots: &[SectorRoot],
) -> (Vec<Hash256>, Vec<Hash256>) {
    fn gather(
        leaves: &[Hash256],
        lo: u64,
        size: u64,
        touched: &[u64],
        proof: &mut Vec<Hash256>,
    ) {
        let any_touched = touched
            .iter()
            .any(|&i| i >= lo && i < lo + size);
        if !any_touched {
            proof.push(subtree_root(leaves, lo, size));
        } else if size > 1 {
            let half = size / 2;
            gather(leaves, lo, half, touched, proof);
            gather(leaves, lo + half, half, touched, proof);
        }
        // touched single leaf: the verifier already holds it in leaf_hashes
    }

    let leaves: Vec<Hash256> = old_roots.iter().map(|r| Hash256(r.0)).collect();
    let mut subtree_hashes = vec![];
    if touched.is_empty() {
        // appends only: the whole old tree is one untouched subtree
        subtree_hashes.push(meta_root(old_roots));
    } else {
        gather(
            &leaves,
            0,
            next_pow2(leaves.len() as u64),
            touched,
            &mut subtree_hashes,
        );
    }
    let leaf_hashes = touched
        .iter()
        .filter(|&&i| i < old_roots.len() as u64)
        .map(|&i| Hash256(old_roots[i as usize].0))
        .collect();
    (subtree_hashes, leaf_hashes)
}

/// Verify that a diff proof is consistent with `old_root`. Used by the
/// renter side (and our tests) before trusting the host's new root.
pub fn verify_diff_proof(
    old_root: &Hash256,
    n_leaves: u64,
    touched: &[u64],
    subtree_hashes: &[Hash256],
    leaf_hashes: &[Hash256],
) -> bool {
    fn reconstruct(
        lo: u64,
        size: u64,
        touched: &[u64],
        subtrees: &mut std::slice::Iter<Hash256>,
        leaves: &mut std::slice::Iter<Hash256>,
    ) -> Option<Hash256> {
        let any_touched = touched
            .iter()
            .any(|&i| i >= lo && i < lo + size);
        if !any_touched {
            return subtrees.next().copied();
        }
        if size == 1 {
            return leaves.next().copied();
        }
        let half = size / 2;
        let left = reconstruct(lo, half, touched, subtrees, leaves)?;
        let right = reconstruct(lo + half, half, touched, subtrees, leaves)?;
        Some(node_hash(&left, &right))
    }

    if touched.is_empty() {
        return subtree_hashes.len() == 1 && subtree_hashes[0] == *old_root;
    }
    let mut subtree_iter = subtree_hashes.iter();
    let mut leaf_iter = leaf_hashes.iter();
    let Some(computed) = reconstruct(
        0,
        next_pow2(n_leaves),
        touched,
        &mut subtree_iter,
        &mut leaf_iter,
    ) else {
        return false;
    };
    subtree_iter.next().is_none() && leaf_iter.next().is_none() && computed == *old_root
}

/// A cached Merkle tree over a contract's sector-root list. Kept as an
/// implicit complete binary tree in a flat array so that every mutation is
/// O(log n) node rehashes (append pays an O(n) rebuild when the leaf
/// capacity doubles).
#[derive(Clone)]
pub struct CachedMerkleTree {
    /// nodes[1] is the root; leaf i lives at nodes[cap + i].
    nodes: Vec<Hash256>,
    cap: usize,
    len: usize,
}

impl CachedMerkleTree {
    pub fn new(roots: &[SectorRoot]) -> CachedMerkleTree {
        let cap = next_pow2(roots.len() as u64) as usize;
        let mut nodes = vec![ZERO_HASH; 2 * cap];
        for (i, root) in roots.iter().enumerate() {
            nodes[cap + i] = Hash256(root.0);
        }
        let mut tree = CachedMerkleTree {
            nodes,
            cap,
            len: roots.len(),
        };
        tree.rebuild();
        tree
    }

    fn rebuild(&mut self) {
        for i in (1..self.cap).rev() {
            let (left, right) = (self.nodes[2 * i], self.nodes[2 * i + 1]);
            self.nodes[i] = node_hash(&left, &right);
        }
    }

    /// Rehash the path from leaf `i` to the root.
    fn rehash_path(&mut self, i: usize) {
        let mut node = (self.cap + i) / 2;
        while node >= 1 {
            let (left, right) = (self.nodes[2 * node], self.nodes[2 * node + 1]);
            self.nodes[node] = node_hash(&left, &right);
            node /= 2;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root(&self) -> Hash256 {
        self.nodes[1]
    }

    pub fn leaf(&self, i: usize) -> Option<SectorRoot> {
        if i < self.len {
            Some(SectorRoot(self.nodes[self.cap + i].0))
        } else {
            None
        }
    }

    pub fn leaves(&self) -> Vec<SectorRoot> {
        (0..self.len)
            .map(|i| SectorRoot(self.nodes[self.cap + i].0))
            .collect()
    }

    pub fn append(&mut self, root: &SectorRoot) {
        if self.len == self.cap {
            // double the capacity and rebuild
            let mut nodes = vec![ZERO_HASH; 4 * self.cap];
            for i in 0..self.len {
                nodes[2 * self.cap + i] = self.nodes[self.cap + i];
            }
            self.nodes = nodes;
            self.cap *= 2;
            self.rebuild();
        }
        self.nodes[self.cap + self.len] = Hash256(root.0);
        self.len += 1;
        self.rehash_path(self.len - 1);
    }

    pub fn update(&mut self, i: usize, root: &SectorRoot) -> bool {
        if i >= self.len {
            return false;
        }
        self.nodes[self.cap + i] = Hash256(root.0);
        self.rehash_path(i);
        true
    }

    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        if a >= self.len || b >= self.len {
            return false;
        }
        self.nodes.swap(self.cap + a, self.cap + b);
        self.rehash_path(a);
        self.rehash_path(b);
        true
    }

    pub fn trim(&mut self, n: usize) -> bool {
        if n > self.len {
            return false;
        }
        for i in (self.len - n)..self.len {
            self.nodes[self.cap + i] = ZERO_HASH;
            self.rehash_path(i);
        }
        self.len -= n;
        true
    }
}

#[cfg(test)]
mod test {
    use rand::RngCore;

    use super::*;

    fn random_roots(n: usize) -> Vec<SectorRoot> {
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| {
                let mut buf = [0u8; 32];
                rng.fill_bytes(&mut buf);
                SectorRoot(buf)
            })
            .collect()
    }

    #[test]
    fn empty_meta_root_is_zero() {
        assert_eq!(meta_root(&[]), ZERO_HASH);
    }

    #[test]
    fn single_meta_root_is_identity() {
        let roots = random_roots(1);
        assert_eq!(meta_root(&roots), Hash256(roots[0].0));
    }

    #[test]
    fn sector_root_known_structure() {
        // an all-zero sector's root must equal the precomputed zero subtree
        // of height 16 built from hashed zero leaves
        let sector = vec![0u8; SECTOR_SIZE];
        let zero_leaf = leaf_hash(&[0u8; LEAF_SIZE]);
        let mut expected = zero_leaf;
        for _ in 0..16 {
            expected = node_hash(&expected, &expected);
        }
        assert_eq!(Hash256(sector_root(&sector).0), expected);
    }

    #[test]
    fn cached_tree_matches_meta_root() {
        for n in [0usize, 1, 2, 3, 4, 5, 7, 8, 9, 31] {
            let roots = random_roots(n);
            let tree = CachedMerkleTree::new(&roots);
            assert_eq!(tree.root(), meta_root(&roots), "mismatch at {} leaves", n);
            assert_eq!(tree.leaves(), roots);
        }
    }

    #[test]
    fn cached_tree_append_update_swap_trim() {
        let mut roots = random_roots(5);
        let mut tree = CachedMerkleTree::new(&roots);

        let extra = random_roots(4);
        for r in extra.iter() {
            tree.append(r);
            roots.push(*r);
            assert_eq!(tree.root(), meta_root(&roots));
        }

        let replacement = random_roots(1)[0];
        assert!(tree.update(2, &replacement));
        roots[2] = replacement;
        assert_eq!(tree.root(), meta_root(&roots));
        assert!(!tree.update(roots.len(), &replacement));

        assert!(tree.swap(0, roots.len() - 1));
        let last = roots.len() - 1;
        roots.swap(0, last);
        assert_eq!(tree.root(), meta_root(&roots));

        assert!(tree.trim(3));
        roots.truncate(roots.len() - 3);
        assert_eq!(tree.root(), meta_root(&roots));
        assert_eq!(tree.len(), roots.len());
        assert!(!tree.trim(roots.len() + 1));
    }

    #[test]
    fn range_proof_roundtrip() {
        let roots = random_roots(11);
        let root = meta_root(&roots);
        for (start, end) in [(0u64, 11u64), (0, 1), (3, 7), (10, 11), (7, 8)] {
            let proof = build_meta_range_proof(&roots, start, end);
            assert_eq!(
                proof.len() as u64,
                range_proof_size(roots.len() as u64, start, end)
            );
            let range = &roots[start as usize..end as usize];
            assert!(verify_meta_range_proof(
                &root,
                roots.len() as u64,
                range,
                start,
                end,
                &proof
            ));
            // a corrupted proof must not verify
            if !proof.is_empty() {
                let mut bad = proof.clone();
                bad[0].0[0] ^= 1;
                assert!(!verify_meta_range_proof(
                    &root,
                    roots.len() as u64,
                    range,
                    start,
                    end,
                    &bad
                ));
            }
        }
    }

    #[test]
    fn sector_range_proof_roundtrip() {
        let mut sector = vec![0u8; SECTOR_SIZE];
        rand::thread_rng().fill_bytes(&mut sector[..4096]);
        let root = sector_root(&sector);

        let (start, end) = (0u64, 4u64); // first 256 bytes
        let proof = build_sector_range_proof(&sector, start, end);
        let data = &sector[(start as usize * LEAF_SIZE)..(end as usize * LEAF_SIZE)];
        assert!(verify_sector_range_proof(&root, data, start, end, &proof));

        let mut bad = data.to_vec();
        bad[0] ^= 1;
        assert!(!verify_sector_range_proof(&root, &bad, start, end, &proof));
    }

    #[test]
    fn diff_proof_roundtrip() {
        let roots = random_roots(9);
        let old_root = meta_root(&roots);

        // touched indices 2 and 6 (e.g. a swap)
        let touched = vec![2u64, 6u64];
        let (subtrees, leaves) = build_diff_proof(&touched, &roots);
        assert_eq!(leaves.len(), 2);
        assert!(verify_diff_proof(
            &old_root,
            roots.len() as u64,
            &touched,
            &subtrees,
            &leaves
        ));

        // append-only diff: single subtree hash equal to the old root
        let (subtrees, leaves) = build_diff_proof(&[], &roots);
        assert_eq!(subtrees, vec![old_root]);
        assert!(leaves.is_empty());
        assert!(verify_diff_proof(&old_root, roots.len() as u64, &[], &subtrees, &leaves));
    }
}
