//! Program driver (C7) — Orange Paper Section 4.7
//!
//! Wires the three evaluation passes (input script, prevout script, and —
//! after P2SH/segwit unwrapping — the redeem/witness script) together into
//! the single `connect` algorithm an output's spender must satisfy.

use crate::chain::context::Flags;
use crate::chain::script::{opcode, Script};
use crate::chain::transaction::Transaction;
use crate::constants::{
    MAX_SCRIPT_ELEMENT_SIZE, MAX_WITNESS_V0_STACK_ITEMS, SEGWIT_P2WPKH_LENGTH, SEGWIT_P2WSH_LENGTH, TAPROOT_ANNEX_TAG, TAPSCRIPT_LEAF_VERSION,
};
use crate::error::{ConsensusError, Result};
use crate::hash::{hash160, sha256, tagged_hash, Hash};
use crate::interpreter::{Program, ScriptVersion, SignatureContext};

/// Connect an input's unlocking script against its prevout's locking
/// script (and, where applicable, the witness) under `flags`. Returns
/// `Ok(())` only when every script run terminates successfully.
pub fn connect(tx: &Transaction, input_index: usize, flags: Flags) -> Result<()> {
    let input = tx.inputs().get(input_index).ok_or(ConsensusError::InvalidInputIndex(input_index))?;
    let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(input_index))?;

    if flags.contains(Flags::BIP16) && !input.script.is_push_only() {
        return Err(ConsensusError::NonPushInInputScript);
    }

    let mut program = Program::new(vec![], flags, ScriptVersion::Unversioned, Some(sig_ctx(tx, input_index, prevout.value, None)));
    if !program.eval(&input.script)? {
        return Err(ConsensusError::VerifyFailed);
    }
    let stack = std::mem::take(&mut program.stack);

    let mut program = Program::new(stack, flags, ScriptVersion::Unversioned, Some(sig_ctx(tx, input_index, prevout.value, None)));
    if !program.eval(&prevout.script)? {
        return Err(ConsensusError::VerifyFailed);
    }
    let mut stack = program.stack;

    // P2SH (BIP16): the prevout script is HASH160<20>EQUAL and the input
    // script's final stack item is the serialized redeem script.
    if flags.contains(Flags::BIP16) {
        if let Some(expected_hash) = prevout.script.is_pay_to_script_hash() {
            let redeem_bytes = stack.last().cloned().ok_or(ConsensusError::StackUnderflow)?;
            if hash160(&redeem_bytes).as_slice() != expected_hash {
                return Err(ConsensusError::WitnessProgramHashMismatch);
            }
            let _ = stack.pop();
            let redeem_script = Script::parse(&redeem_bytes)?;
            if let Some((version, program_bytes)) = redeem_script.witness_program() {
                return connect_segwit(tx, input_index, flags, version, program_bytes, stack);
            }
            let mut inner = Program::new(stack, flags, ScriptVersion::Unversioned, Some(sig_ctx(tx, input_index, prevout.value, None)));
            if !inner.eval(&redeem_script)? {
                return Err(ConsensusError::VerifyFailed);
            }
            if input.witness.is_empty() {
                return Ok(());
            }
            return Err(ConsensusError::UnexpectedWitness);
        }
    }

    if let Some((version, program_bytes)) = prevout.script.witness_program() {
        return connect_segwit(tx, input_index, flags, version, program_bytes, vec![]);
    }

    if !input.witness.is_empty() {
        return Err(ConsensusError::UnexpectedWitness);
    }
    Ok(())
}

fn sig_ctx(tx: &Transaction, input_index: usize, amount: u64, tapleaf_hash: Option<Hash>) -> SignatureContext<'_> {
    SignatureContext { tx, input_index, amount, tapleaf_hash, annex: None }
}

/// BIP141/143 v0 and BIP341/342 v1 witness program dispatch. `outer_stack`
/// carries any items left from a P2SH-wrapped spend (empty for a bare
/// witness output).
fn connect_segwit(tx: &Transaction, input_index: usize, flags: Flags, version: u8, program_bytes: &[u8], outer_stack: Vec<Vec<u8>>) -> Result<()> {
    if !flags.contains(Flags::BIP141) {
        return Err(ConsensusError::UnexpectedWitness);
    }
    if !outer_stack.is_empty() {
        return Err(ConsensusError::WitnessProgramMismatch);
    }
    let input = &tx.inputs()[input_index];
    let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(input_index))?;
    let witness_items = input.witness.items();

    match version {
        0 => connect_v0(tx, input_index, flags, program_bytes, witness_items, prevout.value),
        1 if flags.contains(Flags::BIP341) => connect_v1(tx, input_index, flags, program_bytes, witness_items),
        // Unknown witness versions are reserved for future soft forks and
        // succeed unconditionally (Orange Paper Section 4.7).
        _ => Ok(()),
    }
}

fn connect_v0(tx: &Transaction, input_index: usize, flags: Flags, program_bytes: &[u8], witness_items: &[Vec<u8>], amount: u64) -> Result<()> {
    if witness_items.len() > MAX_WITNESS_V0_STACK_ITEMS {
        return Err(ConsensusError::MalformedWitness);
    }
    if let Some(item) = witness_items.iter().find(|item| item.len() > MAX_SCRIPT_ELEMENT_SIZE) {
        return Err(ConsensusError::OversizePush(item.len()));
    }
    match program_bytes.len() {
        SEGWIT_P2WPKH_LENGTH => {
            if witness_items.len() != 2 {
                return Err(ConsensusError::MalformedWitness);
            }
            if hash160(&witness_items[1]).as_slice() != program_bytes {
                return Err(ConsensusError::WitnessProgramHashMismatch);
            }
            let mut script_code = vec![opcode::DUP, opcode::HASH160, 20];
            script_code.extend_from_slice(program_bytes);
            script_code.push(opcode::EQUALVERIFY);
            script_code.push(opcode::CHECKSIG);
            let script_code = Script::parse(&script_code)?;
            let stack = vec![witness_items[0].clone(), witness_items[1].clone()];
            let mut program = Program::new(stack, flags, ScriptVersion::V0, Some(sig_ctx(tx, input_index, amount, None)));
            if !program.eval(&script_code)? {
                return Err(ConsensusError::VerifyFailed);
            }
            Ok(())
        }
        SEGWIT_P2WSH_LENGTH => {
            let witness_script_bytes = witness_items.last().ok_or(ConsensusError::MalformedWitness)?;
            if sha256(witness_script_bytes).as_slice() != program_bytes {
                return Err(ConsensusError::WitnessProgramHashMismatch);
            }
            let witness_script = Script::parse(witness_script_bytes)?;
            let stack = witness_items[..witness_items.len() - 1].to_vec();
            let mut program = Program::new(stack, flags, ScriptVersion::V0, Some(sig_ctx(tx, input_index, amount, None)));
            if !program.eval(&witness_script)? {
                return Err(ConsensusError::VerifyFailed);
            }
            Ok(())
        }
        _ => Err(ConsensusError::WitnessProgramMismatch),
    }
}

fn connect_v1(tx: &Transaction, input_index: usize, flags: Flags, program_bytes: &[u8], witness_items: &[Vec<u8>]) -> Result<()> {
    if program_bytes.len() != 32 {
        // Unknown-length v1 programs are reserved for future upgrades.
        return Ok(());
    }
    let mut items = witness_items.to_vec();
    let annex = if items.len() >= 2 && items.last().map(|item| item.first() == Some(&TAPROOT_ANNEX_TAG)).unwrap_or(false) {
        if !flags.contains(Flags::BIP341) {
            return Err(ConsensusError::UnexpectedAnnex);
        }
        items.pop()
    } else {
        None
    };

    if items.len() == 1 {
        // Key-path spend: a single 64- or 65-byte Schnorr signature.
        let input = &tx.inputs()[input_index];
        let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(input_index))?;
        let output_key = crate::ecc::parse_xonly_public_key(program_bytes)?;
        let stack = vec![items[0].clone()];
        let mut program = Program::new(stack, flags, ScriptVersion::V1Tapscript, Some(SignatureContext { tx, input_index, amount: prevout.value, tapleaf_hash: None, annex: annex.as_deref() }));
        let script = Script::parse(&[opcode::CHECKSIG]).unwrap();
        program.stack.push(output_key.serialize().to_vec());
        if !program.eval(&script)? {
            return Err(ConsensusError::VerifyFailed);
        }
        return Ok(());
    }

    // Script-path (tapscript) spend: control block ∥ tapscript ∥ stack items.
    if items.len() < 2 {
        return Err(ConsensusError::MalformedWitness);
    }
    let control_block = items.pop().ok_or(ConsensusError::MalformedWitness)?;
    let tapscript_bytes = items.pop().ok_or(ConsensusError::MalformedWitness)?;
    verify_control_block(&control_block, &tapscript_bytes, program_bytes)?;

    let leaf_version = control_block[0] & 0xfe;
    let tapleaf_hash = tapleaf_hash(leaf_version, &tapscript_bytes);
    if leaf_version != TAPSCRIPT_LEAF_VERSION {
        // Unknown leaf versions succeed unconditionally (future upgrade hook).
        return Ok(());
    }
    let tapscript = Script::parse(&tapscript_bytes)?;
    let input = &tx.inputs()[input_index];
    let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(input_index))?;
    let witness_size: usize = witness_items.iter().map(|item| item.len() + crate::codec::varint_size(item.len() as u64)).sum();
    let mut program = Program::new(
        items,
        flags,
        ScriptVersion::V1Tapscript,
        Some(SignatureContext { tx, input_index, amount: prevout.value, tapleaf_hash: Some(tapleaf_hash), annex: annex.as_deref() }),
    )
    .with_tapscript_budget(witness_size);
    if !program.eval(&tapscript)? {
        return Err(ConsensusError::VerifyFailed);
    }
    Ok(())
}

fn tapleaf_hash(leaf_version: u8, script_bytes: &[u8]) -> Hash {
    let mut msg = Vec::with_capacity(1 + crate::codec::varint_size(script_bytes.len() as u64) + script_bytes.len());
    msg.push(leaf_version);
    msg.extend_from_slice(&crate::codec::encode_varint(script_bytes.len() as u64));
    msg.extend_from_slice(script_bytes);
    tagged_hash("TapLeaf", &msg)
}

/// Verify a BIP341 control block: recompute the Merkle path from the
/// tapleaf hash up to the claimed output key, and confirm it matches the
/// witness program (the output key, x-only).
fn verify_control_block(control_block: &[u8], script_bytes: &[u8], output_program: &[u8]) -> Result<()> {
    if control_block.is_empty() || (control_block.len() - 1) % 32 != 0 || control_block.len() > 1 + 32 + 128 * 32 {
        return Err(ConsensusError::InvalidControlBlock);
    }
    let leaf_version = control_block[0] & 0xfe;
    let parity = control_block[0] & 0x01;
    let internal_key_bytes = &control_block[1..33];
    let internal_key = crate::ecc::parse_xonly_public_key(internal_key_bytes)?;

    let mut node = tapleaf_hash(leaf_version, script_bytes);
    for chunk in control_block[33..].chunks(32) {
        node = tagged_branch(&node, chunk);
    }

    // The control block's parity bit records the internal key's actual
    // point sign for the signer's benefit; verification only needs the
    // tweaked key's x-coordinate to match the committed program (BIP341).
    let _ = parity;
    let secp = secp256k1::Secp256k1::verification_only();
    let (tweaked, _) = taproot_tweak(&secp, &internal_key, &node)?;
    if tweaked.serialize() != output_program {
        return Err(ConsensusError::InvalidControlBlock);
    }
    Ok(())
}

fn tagged_branch(a: &Hash, b: &[u8]) -> Hash {
    let (lo, hi) = if a.as_slice() <= b { (a.as_slice(), b) } else { (b, a.as_slice()) };
    let mut msg = Vec::with_capacity(64);
    msg.extend_from_slice(lo);
    msg.extend_from_slice(hi);
    tagged_hash("TapBranch", &msg)
}

fn taproot_tweak(
    secp: &secp256k1::Secp256k1<secp256k1::VerifyOnly>,
    internal_key: &secp256k1::XOnlyPublicKey,
    merkle_root: &Hash,
) -> Result<(secp256k1::XOnlyPublicKey, secp256k1::Parity)> {
    let mut msg = Vec::with_capacity(64);
    msg.extend_from_slice(&internal_key.serialize());
    msg.extend_from_slice(merkle_root);
    let tweak_hash = tagged_hash("TapTweak", &msg);
    let tweak = secp256k1::Scalar::from_be_bytes(tweak_hash).map_err(|_| ConsensusError::InvalidControlBlock)?;
    internal_key.add_tweak(secp, &tweak).map_err(|_| ConsensusError::InvalidControlBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::context::Forks;
    use crate::chain::input::Input;
    use crate::chain::output::Output;
    use crate::chain::point::Outpoint;
    use crate::chain::witness::Witness;
    use secp256k1::{rand, Keypair, Secp256k1};

    fn p2pkh_script(pubkey_hash: &[u8]) -> Script {
        let mut bytes = vec![opcode::DUP, opcode::HASH160, 20];
        bytes.extend_from_slice(pubkey_hash);
        bytes.push(opcode::EQUALVERIFY);
        bytes.push(opcode::CHECKSIG);
        Script::parse(&bytes).unwrap()
    }

    #[test]
    fn test_p2pkh_spend_succeeds() {
        let secp = Secp256k1::new();
        let secret = secp256k1::SecretKey::new(&mut rand::thread_rng());
        let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
        let pubkey_bytes = public.serialize().to_vec();
        let pubkey_hash = hash160(&pubkey_bytes);

        let prevout_script = p2pkh_script(&pubkey_hash);
        let input = Input::new(Outpoint::new([9u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty())
            .with_prevout(5000, prevout_script.clone());
        let tx = Transaction::new(1, vec![input], vec![Output::new(4000, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();

        let subscript = prevout_script.clone();
        let sighash = crate::sighash::legacy_sighash(&tx, 0, &subscript, &[], crate::sighash::SIGHASH_ALL).unwrap();
        let message = secp256k1::Message::from_digest(sighash);
        let sig = secp.sign_ecdsa(&message, &secret);
        let mut sig_bytes = sig.serialize_der().to_vec();
        sig_bytes.push(crate::sighash::SIGHASH_ALL);

        let mut input_script_bytes = vec![sig_bytes.len() as u8];
        input_script_bytes.extend_from_slice(&sig_bytes);
        input_script_bytes.push(pubkey_bytes.len() as u8);
        input_script_bytes.extend_from_slice(&pubkey_bytes);
        let unlocking = Script::parse(&input_script_bytes).unwrap();

        let tx = Transaction::new(1, vec![Input::new(Outpoint::new([9u8; 32], 0), unlocking, 0xffff_ffff, Witness::empty()).with_prevout(5000, prevout_script)], vec![Output::new(4000, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();
        let flags = Forks::all().reduce();
        assert!(connect(&tx, 0, flags).is_ok());
    }

    #[test]
    fn test_p2sh_wrong_redeem_script_hash_fails() {
        let redeem = Script::parse(&[opcode::PUSH_POSITIVE_1]).unwrap();
        let wrong_hash = [0u8; 20];
        let mut prevout_bytes = vec![opcode::HASH160, 20];
        prevout_bytes.extend_from_slice(&wrong_hash);
        prevout_bytes.push(opcode::EQUAL);
        let prevout_script = Script::parse(&prevout_bytes).unwrap();

        let mut unlocking_bytes = vec![redeem.len() as u8];
        unlocking_bytes.extend_from_slice(redeem.to_bytes());
        let unlocking = Script::parse(&unlocking_bytes).unwrap();

        let input = Input::new(Outpoint::new([1u8; 32], 0), unlocking, 0xffff_ffff, Witness::empty()).with_prevout(1000, prevout_script);
        let tx = Transaction::new(1, vec![input], vec![Output::new(900, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();
        assert!(connect(&tx, 0, Forks::all().reduce()).is_err());
    }

    #[test]
    fn test_oversized_witness_item_rejected() {
        let pubkey_hash = [0u8; 20];
        let mut prevout_bytes = vec![opcode::PUSH_SIZE_0, 20];
        prevout_bytes.extend_from_slice(&pubkey_hash);
        let prevout_script = Script::parse(&prevout_bytes).unwrap();
        let witness = Witness::new(vec![vec![0u8; 521], vec![1; 33]]);
        let input = Input::new(Outpoint::new([2u8; 32], 0), Script::empty(), 0xffff_ffff, witness).with_prevout(1000, prevout_script);
        let tx = Transaction::new(2, vec![input], vec![Output::new(900, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();
        assert_eq!(connect(&tx, 0, Forks::all().reduce()), Err(ConsensusError::OversizePush(521)));
    }

    #[test]
    fn test_missing_prevout_rejected() {
        let input = Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty());
        let tx = Transaction::new(1, vec![input], vec![Output::new(900, Script::parse(&[0x51]).unwrap())], 0);
        tx.prepare();
        assert_eq!(connect(&tx, 0, Forks::all().reduce()), Err(ConsensusError::MissingPrevout(0)));
    }
}
