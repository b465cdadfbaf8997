//! Outpoint (C4) — Orange Paper Section 3 / 4.4

use crate::codec::{Reader, Writer};
use crate::error::Result;
use crate::hash::Hash;

pub const NULL_HASH: Hash = [0u8; 32];
pub const NULL_INDEX: u32 = 0xffff_ffff;

/// Reference to a previous output by transaction hash and index. The
/// sentinel `(NULL_HASH, NULL_INDEX)` marks the single input of a coinbase
/// transaction, which spends nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Outpoint {
    pub hash: Hash,
    pub index: u32,
}

impl Outpoint {
    pub const SERIALIZED_SIZE: usize = 36;

    pub fn new(hash: Hash, index: u32) -> Self {
        Outpoint { hash, index }
    }

    pub fn null() -> Self {
        Outpoint { hash: NULL_HASH, index: NULL_INDEX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == NULL_HASH && self.index == NULL_INDEX
    }

    pub fn read(reader: &mut Reader) -> Self {
        let hash = reader.read_array();
        let index = reader.read_u32_le();
        Outpoint { hash, index }
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_bytes(&self.hash)?;
        writer.write_u32_le(self.index)
    }
}
