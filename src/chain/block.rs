//! Block header and block (C4) — Orange Paper Section 3 / 4.4

use crate::chain::transaction::Transaction;
use crate::codec::{Reader, Writer};
use crate::constants::MAX_BLOCK_WEIGHT;
use crate::error::{ConsensusError, Result};
use crate::hash::{hash256, merkle_root, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub previous: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub const SERIALIZED_SIZE: usize = 80;

    pub fn read(reader: &mut Reader) -> Self {
        Header {
            version: reader.read_u32_le(),
            previous: reader.read_array(),
            merkle_root: reader.read_array(),
            timestamp: reader.read_u32_le(),
            bits: reader.read_u32_le(),
            nonce: reader.read_u32_le(),
        }
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_u32_le(self.version)?;
        writer.write_bytes(&self.previous)?;
        writer.write_bytes(&self.merkle_root)?;
        writer.write_u32_le(self.timestamp)?;
        writer.write_u32_le(self.bits)?;
        writer.write_u32_le(self.nonce)
    }

    pub fn hash(&self) -> Hash {
        let mut writer = Writer::with_capacity(Self::SERIALIZED_SIZE);
        self.write(&mut writer).expect("fixed-size header");
        hash256(&writer.into_vec())
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Block { header, transactions }
    }

    /// Structural checks independent of chain-selection context: at least
    /// one transaction, the first (and only the first) is coinbase, the
    /// block is not vulnerable to CVE-2012-2459-style Merkle malleation by
    /// tail-duplication, and the block stays within the BIP141 weight cap.
    pub fn check(&self) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(ConsensusError::EmptyBlock);
        }
        if !self.transactions[0].is_coinbase() {
            return Err(ConsensusError::MisplacedCoinbase);
        }
        if self.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ConsensusError::MisplacedCoinbase);
        }
        if self.is_malleable32() {
            return Err(ConsensusError::MalleatedMerkleTree);
        }
        if self.weight() > MAX_BLOCK_WEIGHT {
            return Err(ConsensusError::OversizeBlockWeight);
        }
        for tx in &self.transactions {
            tx.check()?;
        }
        Ok(())
    }

    pub fn compute_merkle_root(&self) -> Option<Hash> {
        let leaves: Vec<Hash> = self.transactions.iter().map(Transaction::identity_hash).collect();
        merkle_root(&leaves).map(|(root, _)| root)
    }

    /// True if the actual transaction hashes in this block exhibit a
    /// literal CVE-2012-2459 duplicate-pair pattern while folding the
    /// Merkle tree. Content-dependent and narrower than `is_malleable32`:
    /// it only catches a block that already contains the malleating
    /// duplicate, not every transaction count that would admit one.
    pub fn is_malleated32(&self) -> bool {
        let leaves: Vec<Hash> = self.transactions.iter().map(Transaction::identity_hash).collect();
        match merkle_root(&leaves) {
            Some((_, had_duplicate_pair)) => had_duplicate_pair,
            None => false,
        }
    }

    /// True if this block's transaction *count* admits an equivalent
    /// Merkle tree formed by duplicating the last transaction, independent
    /// of the transactions' actual content (Orange Paper Section 4.2/8;
    /// the rejection rule consensus actually enforces, as opposed to the
    /// narrower content-dependent `is_malleated32`).
    pub fn is_malleable32(&self) -> bool {
        let count = self.transactions.len();
        let mut width = 1usize;
        while 3 * width <= count {
            if Self::is_malleable32_size(count, width) {
                return true;
            }
            width *= 2;
        }
        false
    }

    /// True iff a block of `count` transactions admits an equivalent
    /// Merkle tree at duplication width `width` (`width` must be a power
    /// of two). `count` and `count + width` would then fold to the same
    /// root, so a block of the latter size is indistinguishable from one
    /// of the former with its final transaction malleated in.
    pub fn is_malleable32_size(count: usize, width: usize) -> bool {
        width.is_power_of_two() && count % (2 * width) == width && count >= 3 * width
    }

    pub fn weight(&self) -> usize {
        self.transactions.iter().map(Transaction::weight).sum()
    }

    pub fn read(reader: &mut Reader) -> Result<Self> {
        let header = Header::read(reader);
        let count = reader.read_varint() as usize;
        let mut transactions = Vec::with_capacity(count.min(8192));
        for _ in 0..count {
            transactions.push(Transaction::read(reader)?);
        }
        if !reader.is_valid() {
            return Err(ConsensusError::UnexpectedEnd("block"));
        }
        Ok(Block::new(header, transactions))
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        self.header.write(writer)?;
        writer.write_varint(self.transactions.len() as u64)?;
        for tx in &self.transactions {
            tx.write_witnessed(writer)?;
        }
        Ok(())
    }
}
