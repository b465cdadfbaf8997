//! Witness (C4) — Orange Paper Section 3 / 4.4

use crate::codec::{Reader, Writer};
use crate::error::Result;
use std::sync::Arc;

/// An ordered sequence of byte strings carried outside the legacy input
/// script (BIP141). An empty witness is the unsegregated case for that
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    inner: Arc<Vec<Vec<u8>>>,
}

impl Witness {
    pub fn new(items: Vec<Vec<u8>>) -> Self {
        Witness { inner: Arc::new(items) }
    }

    pub fn empty() -> Self {
        Witness { inner: Arc::new(Vec::new()) }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.inner
    }

    pub fn read(reader: &mut Reader) -> Self {
        let count = reader.read_varint() as usize;
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(reader.read_var_bytes());
        }
        Witness::new(items)
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_varint(self.inner.len() as u64)?;
        for item in self.inner.iter() {
            writer.write_var_bytes(item)?;
        }
        Ok(())
    }

    pub fn serialized_size(&self) -> usize {
        let mut size = crate::codec::varint_size(self.inner.len() as u64);
        for item in self.inner.iter() {
            size += crate::codec::varint_size(item.len() as u64) + item.len();
        }
        size
    }
}
