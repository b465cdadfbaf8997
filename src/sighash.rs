//! Signature-hash engine (C5) — Orange Paper Section 4.5
//!
//! Three algorithms selected by script version: legacy (unversioned),
//! BIP143 (v0 segwit), BIP341 (v1 taproot). Each uses a different cache of
//! precomputed component hashes; those caches are owned by `Transaction`
//! and populated once via `Transaction::prepare`.

use crate::chain::script::{opcode, serialize_operations, Operation, Script};
use crate::chain::transaction::{Transaction, V0Cache, V1Cache};
use crate::error::{ConsensusError, Result};
use crate::hash::{hash256, sha256, tagged_hash, Hash};

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;
pub const SIGHASH_DEFAULT: u8 = 0x00;
const SIGHASH_MASK: u8 = 0x1f;

/// `find_and_delete`'s sentinel result when a SIGHASH_SINGLE input index is
/// not matched by an output: the historical quirk of hashing the integer
/// 1, preserved exactly (Orange Paper Section 9, Open Questions).
const SINGLE_MISSING_OUTPUT_SENTINEL: Hash = {
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    bytes
};

fn mask(hash_type: u8) -> u8 {
    hash_type & SIGHASH_MASK
}

fn anyone_can_pay(hash_type: u8) -> bool {
    hash_type & SIGHASH_ANYONECANPAY != 0
}

/// Legacy (pre-segwit): `{0x01, 0x02, 0x03, 0x81, 0x82, 0x83}`.
pub fn validate_legacy_sighash_type(hash_type: u8) -> Result<()> {
    match mask(hash_type) {
        SIGHASH_ALL | SIGHASH_NONE | SIGHASH_SINGLE => Ok(()),
        _ => Err(ConsensusError::InvalidSighashType(hash_type)),
    }
}

/// Taproot additionally allows `0x00` (HASH_DEFAULT), which behaves as ALL.
pub fn validate_taproot_sighash_type(hash_type: u8) -> Result<()> {
    if hash_type == SIGHASH_DEFAULT {
        return Ok(());
    }
    validate_legacy_sighash_type(hash_type)
}

/// Strip `OP_CODESEPARATOR` occurrences from a subscript, and further
/// remove any push operation whose data exactly equals `signature` (the
/// `find_and_delete` rule of the legacy sighash algorithm).
fn prepare_legacy_subscript(subscript: &Script, signature: &[u8]) -> Vec<u8> {
    let filtered: Vec<Operation> = subscript
        .operations()
        .iter()
        .filter(|op| op.code != opcode::CODESEPARATOR)
        .filter(|op| !(opcode::is_push(op.code) && !signature.is_empty() && op.data == signature))
        .cloned()
        .collect();
    serialize_operations(&filtered)
}

/// Legacy signature hash (Orange Paper Section 4.5). `subscript` is the
/// script executed since the last `OP_CODESEPARATOR`; `signature` is the
/// exact signature bytes to strip via `find_and_delete` (empty if none,
/// e.g. when precomputing a hash before a signature exists).
pub fn legacy_sighash(tx: &Transaction, input_index: usize, subscript: &Script, signature: &[u8], hash_type: u8) -> Result<Hash> {
    if input_index >= tx.inputs().len() {
        return Err(ConsensusError::InvalidInputIndex(input_index));
    }
    if mask(hash_type) == SIGHASH_SINGLE && input_index >= tx.outputs().len() {
        return Ok(SINGLE_MISSING_OUTPUT_SENTINEL);
    }
    let scriptcode_bytes = prepare_legacy_subscript(subscript, signature);
    let scriptcode = Script::parse(&scriptcode_bytes)?;
    let acp = anyone_can_pay(hash_type);
    let m = mask(hash_type);

    let mut writer = crate::codec::Writer::new();
    writer.write_u32_le(tx.version())?;

    let included: Vec<usize> = if acp { vec![input_index] } else { (0..tx.inputs().len()).collect() };
    writer.write_varint(included.len() as u64)?;
    for &i in &included {
        let input = &tx.inputs()[i];
        input.previous_output.write(&mut writer)?;
        if i == input_index {
            scriptcode.write_var(&mut writer)?;
        } else {
            Script::empty().write_var(&mut writer)?;
        }
        let sequence = if i != input_index && (m == SIGHASH_NONE || m == SIGHASH_SINGLE) { 0 } else { input.sequence };
        writer.write_u32_le(sequence)?;
    }

    match m {
        SIGHASH_NONE => {
            writer.write_varint(0)?;
        }
        SIGHASH_SINGLE => {
            writer.write_varint((input_index + 1) as u64)?;
            for output in &tx.outputs()[..input_index] {
                writer.write_u64_le(u64::MAX)?;
                let _ = output;
                Script::empty().write_var(&mut writer)?;
            }
            tx.outputs()[input_index].write(&mut writer)?;
        }
        _ => {
            writer.write_varint(tx.outputs().len() as u64)?;
            for output in tx.outputs() {
                output.write(&mut writer)?;
            }
        }
    }
    writer.write_u32_le(tx.lock_time())?;
    writer.write_u32_le(hash_type as u32)?;
    Ok(hash256(&writer.into_vec()))
}

/// Precompute the three BIP143 component hashes shared across every input
/// of a transaction.
pub fn compute_v0_cache(tx: &Transaction) -> V0Cache {
    let mut prevouts = crate::codec::Writer::new();
    let mut sequences = crate::codec::Writer::new();
    for input in tx.inputs() {
        input.previous_output.write(&mut prevouts).expect("unbounded writer");
        sequences.write_u32_le(input.sequence).expect("unbounded writer");
    }
    let mut outputs = crate::codec::Writer::new();
    for output in tx.outputs() {
        output.write(&mut outputs).expect("unbounded writer");
    }
    V0Cache {
        hash_prevouts: hash256(&prevouts.into_vec()),
        hash_sequence: hash256(&sequences.into_vec()),
        hash_outputs: hash256(&outputs.into_vec()),
    }
}

/// BIP143 (v0 segwit) signature hash.
pub fn v0_sighash(tx: &Transaction, input_index: usize, script_code: &Script, value: u64, hash_type: u8) -> Result<Hash> {
    let input = tx.inputs().get(input_index).ok_or(ConsensusError::InvalidInputIndex(input_index))?;
    let cache = tx.v0_cache();
    let acp = anyone_can_pay(hash_type);
    let m = mask(hash_type);
    let zero: Hash = [0u8; 32];

    let hash_prevouts = if acp { zero } else { cache.hash_prevouts };
    let hash_sequence = if acp || m == SIGHASH_NONE || m == SIGHASH_SINGLE { zero } else { cache.hash_sequence };
    let hash_outputs = if m == SIGHASH_NONE {
        zero
    } else if m == SIGHASH_SINGLE {
        match tx.outputs().get(input_index) {
            Some(output) => {
                let mut writer = crate::codec::Writer::new();
                output.write(&mut writer)?;
                hash256(&writer.into_vec())
            }
            None => zero,
        }
    } else {
        cache.hash_outputs
    };

    let mut writer = crate::codec::Writer::new();
    writer.write_u32_le(tx.version())?;
    writer.write_bytes(&hash_prevouts)?;
    writer.write_bytes(&hash_sequence)?;
    input.previous_output.write(&mut writer)?;
    script_code.write_var(&mut writer)?;
    writer.write_u64_le(value)?;
    writer.write_u32_le(input.sequence)?;
    writer.write_bytes(&hash_outputs)?;
    writer.write_u32_le(tx.lock_time())?;
    writer.write_u32_le(hash_type as u32)?;
    Ok(hash256(&writer.into_vec()))
}

/// Precompute the five BIP341 component hashes. Requires every input to
/// carry prevout metadata; callers that only need a v0/legacy sighash
/// never force this.
pub fn compute_v1_cache(tx: &Transaction) -> Result<V1Cache> {
    let mut prevouts = crate::codec::Writer::new();
    let mut amounts = crate::codec::Writer::new();
    let mut scripts = crate::codec::Writer::new();
    let mut sequences = crate::codec::Writer::new();
    for (i, input) in tx.inputs().iter().enumerate() {
        let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(i))?;
        input.previous_output.write(&mut prevouts)?;
        amounts.write_u64_le(prevout.value)?;
        prevout.script.write_var(&mut scripts)?;
        sequences.write_u32_le(input.sequence)?;
    }
    let mut outputs = crate::codec::Writer::new();
    for output in tx.outputs() {
        output.write(&mut outputs)?;
    }
    Ok(V1Cache {
        sha_prevouts: sha256(&prevouts.into_vec()),
        sha_amounts: sha256(&amounts.into_vec()),
        sha_scripts: sha256(&scripts.into_vec()),
        sha_sequences: sha256(&sequences.into_vec()),
        sha_outputs: sha256(&outputs.into_vec()),
    })
}

/// Extra inputs needed only for a tapscript (BIP342) spend, as opposed to
/// a taproot keypath spend.
pub struct TapscriptExt {
    pub tapleaf_hash: Hash,
    pub codesep_position: u32,
}

/// BIP341 (v1 taproot) signature hash.
///
/// `annex` is the raw annex bytes (without the 0x50 prefix byte) if the
/// witness carried one. `tapscript` is `Some` only for a tapscript-path
/// spend (BIP342); keypath spends pass `None`.
pub fn v1_sighash(
    tx: &Transaction,
    input_index: usize,
    hash_type: u8,
    annex: Option<&[u8]>,
    tapscript: Option<&TapscriptExt>,
) -> Result<Hash> {
    if input_index >= tx.inputs().len() {
        return Err(ConsensusError::InvalidInputIndex(input_index));
    }
    let acp = anyone_can_pay(hash_type);
    let m = mask(hash_type);

    let mut msg = Vec::new();
    msg.push(0x00u8); // epoch
    msg.push(hash_type);
    msg.extend_from_slice(&tx.version().to_le_bytes());
    msg.extend_from_slice(&tx.lock_time().to_le_bytes());

    if !acp {
        let cache = tx.v1_cache().ok_or(ConsensusError::MissingPrevout(input_index))?;
        msg.extend_from_slice(&cache.sha_prevouts);
        msg.extend_from_slice(&cache.sha_amounts);
        msg.extend_from_slice(&cache.sha_scripts);
        msg.extend_from_slice(&cache.sha_sequences);
    }
    if m != SIGHASH_NONE && m != SIGHASH_SINGLE {
        let cache = tx.v1_cache().ok_or(ConsensusError::MissingPrevout(input_index))?;
        msg.extend_from_slice(&cache.sha_outputs);
    }

    let spend_type = (if annex.is_some() { 1u8 } else { 0u8 }) | (if tapscript.is_some() { 2u8 } else { 0u8 });
    msg.push(spend_type);

    if acp {
        let input = &tx.inputs()[input_index];
        let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(input_index))?;
        let mut writer = crate::codec::Writer::new();
        input.previous_output.write(&mut writer)?;
        writer.write_u64_le(prevout.value)?;
        prevout.script.write_var(&mut writer)?;
        writer.write_u32_le(input.sequence)?;
        msg.extend_from_slice(&writer.into_vec());
    } else {
        msg.extend_from_slice(&(input_index as u32).to_le_bytes());
    }

    if let Some(annex_bytes) = annex {
        let mut writer = crate::codec::Writer::new();
        writer.write_var_bytes(annex_bytes)?;
        msg.extend_from_slice(&sha256(&writer.into_vec()));
    }

    if m == SIGHASH_SINGLE {
        match tx.outputs().get(input_index) {
            Some(output) => {
                let mut writer = crate::codec::Writer::new();
                output.write(&mut writer)?;
                msg.extend_from_slice(&sha256(&writer.into_vec()));
            }
            None => return Err(ConsensusError::InvalidSighashType(hash_type)),
        }
    }

    if let Some(ext) = tapscript {
        msg.extend_from_slice(&ext.tapleaf_hash);
        msg.push(0x00);
        msg.extend_from_slice(&ext.codesep_position.to_le_bytes());
    }

    Ok(tagged_hash("TapSighash", &msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::input::Input;
    use crate::chain::output::Output;
    use crate::chain::point::Outpoint;
    use crate::chain::witness::Witness;

    fn sample_tx() -> Transaction {
        let input = Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty());
        let output = Output::new(5000, Script::parse(&[0x51]).unwrap());
        Transaction::new(1, vec![input], vec![output], 0)
    }

    #[test]
    fn test_legacy_sighash_deterministic() {
        let tx = sample_tx();
        let subscript = Script::parse(&[opcode::CHECKSIG]).unwrap();
        let a = legacy_sighash(&tx, 0, &subscript, &[], SIGHASH_ALL).unwrap();
        let b = legacy_sighash(&tx, 0, &subscript, &[], SIGHASH_ALL).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_legacy_single_missing_output_sentinel() {
        let input_a = Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty());
        let input_b = Input::new(Outpoint::new([2u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty());
        let tx = Transaction::new(1, vec![input_a, input_b], vec![Output::new(1, Script::empty())], 0);
        let subscript = Script::parse(&[opcode::CHECKSIG]).unwrap();
        let hash = legacy_sighash(&tx, 1, &subscript, &[], SIGHASH_SINGLE).unwrap();
        assert_eq!(hash, SINGLE_MISSING_OUTPUT_SENTINEL);
    }

    #[test]
    fn test_legacy_codeseparator_stripped() {
        let tx = sample_tx();
        let with_codesep = Script::parse(&[opcode::CODESEPARATOR, opcode::CHECKSIG]).unwrap();
        let without = Script::parse(&[opcode::CHECKSIG]).unwrap();
        let a = legacy_sighash(&tx, 0, &with_codesep, &[], SIGHASH_ALL).unwrap();
        let b = legacy_sighash(&tx, 0, &without, &[], SIGHASH_ALL).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_v0_sighash_anyone_can_pay_zeroes_prevouts() {
        let tx = sample_tx();
        tx.prepare();
        let script_code = Script::parse(&[opcode::CHECKSIG]).unwrap();
        let h = v0_sighash(&tx, 0, &script_code, 1000, SIGHASH_ALL | SIGHASH_ANYONECANPAY).unwrap();
        assert_ne!(h, [0u8; 32]);
    }

    #[test]
    fn test_v0_sighash_none_zeroes_outputs() {
        let tx = sample_tx();
        tx.prepare();
        let script_code = Script::parse(&[opcode::CHECKSIG]).unwrap();
        let all = v0_sighash(&tx, 0, &script_code, 1000, SIGHASH_ALL).unwrap();
        let none = v0_sighash(&tx, 0, &script_code, 1000, SIGHASH_NONE).unwrap();
        assert_ne!(all, none);
    }

    #[test]
    fn test_validate_sighash_type() {
        assert!(validate_legacy_sighash_type(0x01).is_ok());
        assert!(validate_legacy_sighash_type(0x81).is_ok());
        assert!(validate_legacy_sighash_type(0x00).is_err());
        assert!(validate_taproot_sighash_type(0x00).is_ok());
    }

    #[test]
    fn test_v1_sighash_requires_prevouts() {
        let tx = sample_tx();
        let err = v1_sighash(&tx, 0, SIGHASH_DEFAULT, None, None).unwrap_err();
        assert_eq!(err, ConsensusError::MissingPrevout(0));
    }

    #[test]
    fn test_v1_sighash_deterministic_with_prevouts() {
        let input = Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty())
            .with_prevout(5000, Script::parse(&[0x51]).unwrap());
        let tx = Transaction::new(2, vec![input], vec![Output::new(4000, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();
        let a = v1_sighash(&tx, 0, SIGHASH_DEFAULT, None, None).unwrap();
        let b = v1_sighash(&tx, 0, SIGHASH_DEFAULT, None, None).unwrap();
        assert_eq!(a, b);
    }
}
