//! Hash primitives from Orange Paper Section 4.2 (C2)
//!
//! SHA-1 is carried only for legacy P2SH/pre-BIP16 script support; nothing
//! in this module treats it as collision-resistant.

use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

pub const HASH_LENGTH: usize = 32;
pub const SHORT_HASH_LENGTH: usize = 20;

pub type Hash = [u8; HASH_LENGTH];
pub type ShortHash = [u8; SHORT_HASH_LENGTH];

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn ripemd160(data: &[u8]) -> ShortHash {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HASH160 = RIPEMD160(SHA256(x)), used for P2PKH/P2SH/P2WPKH addressing.
pub fn hash160(data: &[u8]) -> ShortHash {
    ripemd160(&sha256(data))
}

/// HASH256 = SHA256(SHA256(x)), the double-SHA256 used for tx/block ids
/// and Merkle tree nodes.
pub fn hash256(data: &[u8]) -> Hash {
    sha256(&sha256(data))
}

/// BIP340 tagged hash: SHA256(SHA256(tag) || SHA256(tag) || msg).
pub fn tagged_hash(tag: &str, msg: &[u8]) -> Hash {
    let tag_hash = sha256(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(msg);
    hasher.finalize().into()
}

/// Reduce a list of leaf hashes to a single Merkle root, Bitcoin-style:
/// pairs of nodes are HASH256-combined level by level; an odd node at a
/// level is duplicated rather than promoted. Returns `None` on an empty
/// input (callers must handle the empty-tree case themselves; a lone
/// coinbase is the minimum valid input).
///
/// `had_duplicate_pair` in the return tuple flags CVE-2012-2459-style
/// malleability: a level with an odd count whose last node, when
/// duplicated, made the pairing indistinguishable from a level that
/// genuinely had that duplicate as two distinct transactions. Detecting
/// this is the caller's signal to reject the block (`MalleatedMerkleTree`).
pub fn merkle_root(leaves: &[Hash]) -> Option<(Hash, bool)> {
    if leaves.is_empty() {
        return None;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    let mut had_duplicate_pair = false;
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            if level.len() >= 2 && level[level.len() - 2] == last {
                had_duplicate_pair = true;
            }
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0]);
            buf[32..].copy_from_slice(&pair[1]);
            next.push(hash256(&buf));
        }
        level = next;
    }
    Some((level[0], had_duplicate_pair))
}
