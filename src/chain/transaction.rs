//! Transaction (C4) — Orange Paper Section 3 / 4.4
//!
//! Nominal and witnessed wire forms, the segregated flag, identity/witness
//! hashing, and weight/virtual size. Sighash component caches
//! (`V0Cache`/`V1Cache`) live here as plain data; `sighash` computes their
//! contents and `Transaction::prepare` is the explicit, single-threaded
//! step that populates them (Orange Paper Section 5/9: no ambient interior
//! mutation, caches must be filled before concurrent sharing).

use crate::chain::input::Input;
use crate::chain::output::Output;
use crate::chain::script::opcode;
use crate::codec::{Reader, Writer};
use crate::constants::{MAX_MONEY, MAX_TX_SIZE};
use crate::error::{ConsensusError, Result};
use crate::hash::{hash256, Hash};
use crate::interpreter::ScriptNum;
use std::sync::{Arc, OnceLock};

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V0Cache {
    pub hash_prevouts: Hash,
    pub hash_sequence: Hash,
    pub hash_outputs: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V1Cache {
    pub sha_prevouts: Hash,
    pub sha_amounts: Hash,
    pub sha_scripts: Hash,
    pub sha_sequences: Hash,
    pub sha_outputs: Hash,
}

#[derive(Debug)]
struct Caches {
    identity: OnceLock<Hash>,
    witness: OnceLock<Hash>,
    v0: OnceLock<V0Cache>,
    /// `None` when one or more inputs lack prevout metadata at the time
    /// caching was attempted; the v1 sighash engine reports
    /// `MissingPrevout` rather than silently hashing a placeholder.
    v1: OnceLock<Option<V1Cache>>,
}

impl Default for Caches {
    fn default() -> Self {
        Caches { identity: OnceLock::new(), witness: OnceLock::new(), v0: OnceLock::new(), v1: OnceLock::new() }
    }
}

#[derive(Debug)]
struct TransactionInner {
    version: u32,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    lock_time: u32,
    caches: Caches,
}

/// A transaction, value-shaped but internally `Arc`-shared so that cloning
/// a transaction into a block or a pool entry is O(1) (Orange Paper
/// Section 9).
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.version == other.inner.version
            && self.inner.inputs == other.inner.inputs
            && self.inner.outputs == other.inner.outputs
            && self.inner.lock_time == other.inner.lock_time
    }
}
impl Eq for Transaction {}

impl Transaction {
    pub fn new(version: u32, inputs: Vec<Input>, outputs: Vec<Output>, lock_time: u32) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner { version, inputs, outputs, lock_time, caches: Caches::default() }),
        }
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }
    pub fn inputs(&self) -> &[Input] {
        &self.inner.inputs
    }
    pub fn outputs(&self) -> &[Output] {
        &self.inner.outputs
    }
    pub fn lock_time(&self) -> u32 {
        self.inner.lock_time
    }

    pub fn is_coinbase(&self) -> bool {
        self.inner.inputs.len() == 1 && self.inner.inputs[0].previous_output.is_null()
    }

    /// True iff any input carries a non-empty witness.
    pub fn is_segregated(&self) -> bool {
        self.inner.inputs.iter().any(|input| !input.witness.is_empty())
    }

    fn write_prefix(&self, writer: &mut Writer) -> Result<()> {
        writer.write_u32_le(self.inner.version)?;
        writer.write_varint(self.inner.inputs.len() as u64)?;
        for input in &self.inner.inputs {
            input.write(writer)?;
        }
        writer.write_varint(self.inner.outputs.len() as u64)?;
        for output in &self.inner.outputs {
            output.write(writer)?;
        }
        Ok(())
    }

    /// Serialize without witness data.
    pub fn write_nominal(&self, writer: &mut Writer) -> Result<()> {
        self.write_prefix(writer)?;
        writer.write_u32_le(self.inner.lock_time)
    }

    /// Serialize with witness data when the transaction is segregated;
    /// identical to the nominal form otherwise.
    pub fn write_witnessed(&self, writer: &mut Writer) -> Result<()> {
        if !self.is_segregated() {
            return self.write_nominal(writer);
        }
        writer.write_u32_le(self.inner.version)?;
        writer.write_u8(SEGWIT_MARKER)?;
        writer.write_u8(SEGWIT_FLAG)?;
        writer.write_varint(self.inner.inputs.len() as u64)?;
        for input in &self.inner.inputs {
            input.write(writer)?;
        }
        writer.write_varint(self.inner.outputs.len() as u64)?;
        for output in &self.inner.outputs {
            output.write(writer)?;
        }
        for input in &self.inner.inputs {
            input.witness.write(writer)?;
        }
        writer.write_u32_le(self.inner.lock_time)
    }

    pub fn to_nominal_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write_nominal(&mut writer).expect("unbounded writer");
        writer.into_vec()
    }

    pub fn to_witnessed_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write_witnessed(&mut writer).expect("unbounded writer");
        writer.into_vec()
    }

    pub fn nominal_size(&self) -> usize {
        self.to_nominal_bytes().len()
    }

    pub fn witnessed_size(&self) -> usize {
        self.to_witnessed_bytes().len()
    }

    /// `weight = 3 * nominal_size + witnessed_size` (BIP141). For an
    /// unsegregated transaction this reduces to `4 * nominal_size`.
    pub fn weight(&self) -> usize {
        3 * self.nominal_size() + self.witnessed_size()
    }

    pub fn virtual_size(&self) -> usize {
        self.weight().div_ceil(4)
    }

    /// Identity hash: `hash256` of the nominal serialization.
    pub fn identity_hash(&self) -> Hash {
        *self.inner.caches.identity.get_or_init(|| hash256(&self.to_nominal_bytes()))
    }

    /// Witness hash: `hash256` of the witnessed serialization. Equal to
    /// the identity hash for non-segregated transactions.
    pub fn witness_hash(&self) -> Hash {
        *self.inner.caches.witness.get_or_init(|| hash256(&self.to_witnessed_bytes()))
    }

    /// Populate every lazily-computed cache (identity/witness hash, BIP143
    /// and BIP341 component hashes). Callers must invoke this once, on a
    /// single thread, before sharing the transaction across concurrent
    /// input verification.
    pub fn prepare(&self) {
        self.identity_hash();
        self.witness_hash();
        let _ = self.inner.caches.v0.get_or_init(|| crate::sighash::compute_v0_cache(self));
        let _ = self.inner.caches.v1.get_or_init(|| crate::sighash::compute_v1_cache(self).ok());
    }

    pub fn v0_cache(&self) -> &V0Cache {
        self.inner.caches.v0.get_or_init(|| crate::sighash::compute_v0_cache(self))
    }

    pub fn v1_cache(&self) -> Option<&V1Cache> {
        self.inner.caches.v1.get_or_init(|| crate::sighash::compute_v1_cache(self).ok()).as_ref()
    }

    pub fn read(reader: &mut Reader) -> Result<Self> {
        let version = reader.read_u32_le();
        let mut first_count = reader.read_varint();
        let mut marker_flag = false;
        if first_count == 0 {
            // Possible segwit marker: 0x00 followed by a nonzero flag byte.
            let flag = reader.read_u8();
            if flag == 0 {
                return Err(ConsensusError::MalformedWitness);
            }
            marker_flag = true;
            first_count = reader.read_varint();
        }
        let input_count = first_count as usize;
        let mut inputs = Vec::with_capacity(input_count.min(8192));
        for _ in 0..input_count {
            inputs.push(Input::read(reader)?);
        }
        let output_count = reader.read_varint() as usize;
        let mut outputs = Vec::with_capacity(output_count.min(8192));
        for _ in 0..output_count {
            outputs.push(Output::read(reader)?);
        }
        if marker_flag {
            for input in inputs.iter_mut() {
                input.witness = crate::chain::witness::Witness::read(reader);
            }
        }
        let lock_time = reader.read_u32_le();
        if !reader.is_valid() {
            return Err(ConsensusError::UnexpectedEnd("transaction"));
        }
        Ok(Transaction::new(version, inputs, outputs, lock_time))
    }

    /// Context-free structural checks (Orange Paper Section 4.8 `check`).
    pub fn check(&self) -> Result<()> {
        if self.inner.inputs.is_empty() {
            return Err(ConsensusError::EmptyInputs);
        }
        if self.inner.outputs.is_empty() {
            return Err(ConsensusError::EmptyOutputs);
        }
        if self.nominal_size() > MAX_TX_SIZE {
            return Err(ConsensusError::OversizeTransaction);
        }
        let mut seen = std::collections::HashSet::with_capacity(self.inner.inputs.len());
        for input in &self.inner.inputs {
            if !seen.insert(input.previous_output) {
                return Err(ConsensusError::InternalDoubleSpend);
            }
        }
        let is_coinbase = self.is_coinbase();
        if !is_coinbase {
            for input in &self.inner.inputs {
                if input.previous_output.is_null() {
                    return Err(ConsensusError::NullNonCoinbaseInput);
                }
            }
        } else {
            let script_len = self.inner.inputs[0].script.len();
            if !(2..=100).contains(&script_len) {
                return Err(ConsensusError::InvalidCoinbaseSize(script_len));
            }
        }
        let mut total: i64 = 0;
        for output in &self.inner.outputs {
            let value = output.value as i64;
            if value < 0 || value > MAX_MONEY {
                return Err(ConsensusError::InvalidOutputValue(value));
            }
            total = total.checked_add(value).ok_or(ConsensusError::OutputValueOverflow)?;
            if total > MAX_MONEY {
                return Err(ConsensusError::OutputValueOverflow);
            }
        }
        Ok(())
    }

    /// BIP34: a coinbase's input script must begin with a minimally-encoded
    /// push of the current block height (Orange Paper Section 4.8 `check(ctx)`).
    /// Callers only invoke this on coinbase transactions.
    pub fn check_bip34_height(&self, height: u32) -> Result<()> {
        let op = self.inner.inputs[0]
            .script
            .operations()
            .first()
            .ok_or(ConsensusError::Bip34HeightMismatch)?;
        let pushed = if opcode::is_small_number(op.code) {
            opcode::small_number_value(op.code)
        } else if opcode::is_push(op.code) && !op.underflow {
            ScriptNum::from_bytes(&op.data, true, 4).map_err(|_| ConsensusError::Bip34HeightMismatch)?.0
        } else {
            return Err(ConsensusError::Bip34HeightMismatch);
        };
        if pushed != height as i64 {
            return Err(ConsensusError::Bip34HeightMismatch);
        }
        Ok(())
    }

    /// Absolute locktime satisfaction under the given height/time
    /// reference point (Orange Paper Section 4.8 `check(ctx)`).
    pub fn locktime_satisfied(&self, height: u32, time: u32) -> bool {
        if self.inner.lock_time == 0 {
            return true;
        }
        if self.inner.inputs.iter().all(Input::is_final) {
            return true;
        }
        if self.inner.lock_time < crate::constants::LOCKTIME_THRESHOLD {
            self.inner.lock_time <= height
        } else {
            self.inner.lock_time <= time
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::point::Outpoint;
    use crate::chain::script::Script;
    use crate::chain::witness::Witness;

    fn sample_input(witness: Witness) -> Input {
        Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, witness)
    }

    fn sample_output() -> Output {
        Output::new(1000, Script::parse(&[0x51]).unwrap())
    }

    #[test]
    fn test_unsegregated_hashes_equal() {
        let tx = Transaction::new(1, vec![sample_input(Witness::empty())], vec![sample_output()], 0);
        assert!(!tx.is_segregated());
        assert_eq!(tx.identity_hash(), tx.witness_hash());
        assert_eq!(tx.weight(), 4 * tx.nominal_size());
    }

    #[test]
    fn test_segregated_hashes_differ() {
        let tx = Transaction::new(1, vec![sample_input(Witness::new(vec![vec![1, 2]]))], vec![sample_output()], 0);
        assert!(tx.is_segregated());
        assert_ne!(tx.identity_hash(), tx.witness_hash());
        assert_eq!(tx.weight(), 3 * tx.nominal_size() + tx.witnessed_size());
    }

    #[test]
    fn test_round_trip_nominal() {
        let tx = Transaction::new(2, vec![sample_input(Witness::empty())], vec![sample_output()], 500);
        let mut writer = Writer::new();
        tx.write_nominal(&mut writer).unwrap();
        let bytes = writer.into_vec();
        let mut reader = Reader::new(&bytes);
        let decoded = Transaction::read(&mut reader).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_round_trip_witnessed() {
        let tx = Transaction::new(2, vec![sample_input(Witness::new(vec![vec![7; 4]]))], vec![sample_output()], 0);
        let mut writer = Writer::new();
        tx.write_witnessed(&mut writer).unwrap();
        let bytes = writer.into_vec();
        let mut reader = Reader::new(&bytes);
        let decoded = Transaction::read(&mut reader).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.inputs()[0].witness, tx.inputs()[0].witness);
    }

    #[test]
    fn test_check_rejects_empty_inputs() {
        let tx = Transaction::new(1, vec![], vec![sample_output()], 0);
        assert_eq!(tx.check(), Err(ConsensusError::EmptyInputs));
    }

    #[test]
    fn test_check_rejects_internal_double_spend() {
        let input = sample_input(Witness::empty());
        let tx = Transaction::new(1, vec![input.clone(), input], vec![sample_output()], 0);
        assert_eq!(tx.check(), Err(ConsensusError::InternalDoubleSpend));
    }

    #[test]
    fn test_coinbase_script_size_rule() {
        let coinbase_input = Input::new(Outpoint::null(), Script::parse(&[0x01]).unwrap(), 0xffff_ffff, Witness::empty());
        let tx = Transaction::new(1, vec![coinbase_input], vec![sample_output()], 0);
        assert!(tx.is_coinbase());
        assert!(matches!(tx.check(), Err(ConsensusError::InvalidCoinbaseSize(_))));
    }

    #[test]
    fn test_locktime_disabled_by_final_sequence() {
        let tx = Transaction::new(1, vec![sample_input(Witness::empty())], vec![sample_output()], 500_000);
        assert!(tx.locktime_satisfied(0, 0));
    }

    #[test]
    fn test_check_bip34_height_matches() {
        // minimal push of height 300 (0x012c -> LE bytes 0x2c, 0x01)
        let coinbase_input = Input::new(Outpoint::null(), Script::parse(&[0x02, 0x2c, 0x01]).unwrap(), 0xffff_ffff, Witness::empty());
        let tx = Transaction::new(1, vec![coinbase_input], vec![sample_output()], 0);
        assert!(tx.check_bip34_height(300).is_ok());
        assert_eq!(tx.check_bip34_height(301), Err(ConsensusError::Bip34HeightMismatch));
    }

    #[test]
    fn test_check_bip34_height_small_number_opcode() {
        let coinbase_input = Input::new(Outpoint::null(), Script::parse(&[opcode::PUSH_POSITIVE_1 + 9]).unwrap(), 0xffff_ffff, Witness::empty());
        let tx = Transaction::new(1, vec![coinbase_input], vec![sample_output()], 0);
        assert!(tx.check_bip34_height(10).is_ok());
    }

    #[test]
    fn test_locktime_height_vs_time_threshold() {
        let input = Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0, Witness::empty());
        let tx = Transaction::new(1, vec![input], vec![sample_output()], 1000);
        assert!(tx.locktime_satisfied(1000, 0));
        assert!(!tx.locktime_satisfied(999, 0));
    }
}
