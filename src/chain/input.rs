//! Input (C4) — Orange Paper Section 3 / 4.4
//!
//! Prevout and confirmation metadata are attached post-construction as
//! optional side fields, not serialized, and gate `accept`/`connect`/
//! `confirm` (Orange Paper Section 9: validation metadata kept separate
//! from the immutable consensus payload).

use crate::chain::output::Output;
use crate::chain::point::Outpoint;
use crate::chain::script::Script;
use crate::chain::witness::Witness;
use crate::codec::{Reader, Writer};
use crate::error::Result;

/// Metadata about the output an input spends, populated by the caller
/// before `accept`/`connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prevout {
    pub value: u64,
    pub script: Script,
}

/// Metadata about the confirmation state of the spent output, populated by
/// the caller before `confirm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub height: u32,
    pub median_time_past: u32,
    pub coinbase: bool,
    pub spent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub previous_output: Outpoint,
    pub script: Script,
    pub sequence: u32,
    pub witness: Witness,
    pub prevout: Option<Prevout>,
    pub confirmation: Option<Confirmation>,
}

impl Input {
    pub fn new(previous_output: Outpoint, script: Script, sequence: u32, witness: Witness) -> Self {
        Input { previous_output, script, sequence, witness, prevout: None, confirmation: None }
    }

    pub fn with_prevout(mut self, value: u64, script: Script) -> Self {
        self.prevout = Some(Prevout { value, script });
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn is_final(&self) -> bool {
        self.sequence == crate::constants::SEQUENCE_FINAL
    }

    /// BIP68: the relative-lock-time disable bit in the sequence field.
    pub fn relative_lock_disabled(&self) -> bool {
        self.sequence & crate::constants::SEQUENCE_LOCKTIME_DISABLE_FLAG != 0
    }

    /// Read an input from its nominal wire form: outpoint(36) ∥ varlen
    /// script ∥ sequence(4). The witness, if any, is parsed separately by
    /// the transaction codec once the witnessed-form marker is known.
    pub fn read(reader: &mut Reader) -> Result<Self> {
        let previous_output = Outpoint::read(reader);
        let script = Script::read_var(reader)?;
        let sequence = reader.read_u32_le();
        Ok(Input::new(previous_output, script, sequence, Witness::empty()))
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        self.previous_output.write(writer)?;
        self.script.write_var(writer)?;
        writer.write_u32_le(self.sequence)
    }

    pub fn serialized_size(&self) -> usize {
        Outpoint::SERIALIZED_SIZE + crate::codec::varint_size(self.script.len() as u64) + self.script.len() + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_round_trip_excludes_witness() {
        let input = Input::new(Outpoint::null(), Script::empty(), 0xffff_ffff, Witness::new(vec![vec![1]]));
        let mut writer = Writer::new();
        input.write(&mut writer).unwrap();
        let bytes = writer.into_vec();
        let mut reader = Reader::new(&bytes);
        let decoded = Input::read(&mut reader).unwrap();
        assert_eq!(decoded.previous_output, input.previous_output);
        assert_eq!(decoded.sequence, input.sequence);
        assert!(decoded.witness.is_empty());
    }

    #[test]
    fn test_is_final() {
        let input = Input::new(Outpoint::null(), Script::empty(), 0xffff_ffff, Witness::empty());
        assert!(input.is_final());
    }

    #[test]
    fn test_relative_lock_disabled_flag() {
        let input = Input::new(Outpoint::null(), Script::empty(), 1 << 31, Witness::empty());
        assert!(input.relative_lock_disabled());
    }
}
