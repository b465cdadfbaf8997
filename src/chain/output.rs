//! Output (C4) — Orange Paper Section 3 / 4.4

use crate::chain::script::Script;
use crate::codec::{Reader, Writer};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub value: u64,
    pub script: Script,
}

impl Output {
    pub fn new(value: u64, script: Script) -> Self {
        Output { value, script }
    }

    pub fn read(reader: &mut Reader) -> Result<Self> {
        let value = reader.read_u64_le();
        let script = Script::read_var(reader)?;
        Ok(Output { value, script })
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_u64_le(self.value)?;
        self.script.write_var(writer)
    }

    pub fn serialized_size(&self) -> usize {
        8 + crate::codec::varint_size(self.script.len() as u64) + self.script.len()
    }
}
