//! Script interpreter (C6) — Orange Paper Section 4.6
//!
//! A stack machine over a single script's operations. `script_version`
//! selects the sighash algorithm and the small set of opcode-semantics
//! differences between legacy, v0 segwit, and v1 tapscript execution
//! (Orange Paper Section 9: one interpreter loop, a strategy parameter,
//! not three near-duplicate loops).

use crate::chain::context::Flags;
use crate::chain::script::{opcode, Operation, Script};
use crate::chain::transaction::Transaction;
use crate::constants::{MAX_SCRIPT_OPS, MAX_SCRIPT_SIGOPS, MAX_STACK_SIZE};
use crate::ecc;
use crate::error::{ConsensusError, Result};
use crate::hash::{hash160, hash256, ripemd160, sha1, sha256};
use crate::sighash::{self, TapscriptExt};
use secp256k1::Secp256k1;

/// Which sighash algorithm and opcode ruleset governs this evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptVersion {
    Unversioned,
    V0,
    V1Tapscript,
}

/// A minimal-encoding-aware, sign-magnitude little-endian integer, bounded
/// to avoid native overflow (Orange Paper Section 9: script numbers are a
/// dedicated type with explicit range checks, not wrapping integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScriptNum(pub i64);

impl ScriptNum {
    pub fn from_bytes(bytes: &[u8], require_minimal: bool, max_size: usize) -> Result<Self> {
        if bytes.len() > max_size {
            return Err(ConsensusError::NumberOverflow);
        }
        if require_minimal && !bytes.is_empty() {
            let last = bytes[bytes.len() - 1];
            if last & 0x7f == 0 && (bytes.len() <= 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
                return Err(ConsensusError::NonMinimalNumber);
            }
        }
        Ok(ScriptNum(decode_i64(bytes)))
    }

    pub fn to_bytes(self) -> Vec<u8> {
        encode_i64(self.0)
    }
}

fn decode_i64(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= (byte as i64) << (8 * i);
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        result &= !(0x80i64 << (8 * (bytes.len() - 1)));
        result = -result;
    }
    result
}

fn encode_i64(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::new();
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if out.last().copied().unwrap_or(0) & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0 });
    } else if negative {
        *out.last_mut().unwrap() |= 0x80;
    }
    out
}

/// Boolean coercion: any nonzero byte counts true, except a lone trailing
/// `0x80` sign byte with no preceding nonzero bytes.
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, &byte) in bytes.iter().enumerate() {
        if byte != 0 {
            return !(i == bytes.len() - 1 && byte == 0x80);
        }
    }
    false
}

/// Per-input context the interpreter needs to compute signature hashes
/// and, under tapscript, track the sigop budget.
pub struct SignatureContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub amount: u64,
    pub tapleaf_hash: Option<crate::hash::Hash>,
    pub annex: Option<&'a [u8]>,
}

/// An executing script program: stacks, the conditional stack, the op
/// counter, and the position of the most recently executed
/// `OP_CODESEPARATOR`.
pub struct Program<'a> {
    pub stack: Vec<Vec<u8>>,
    pub alt_stack: Vec<Vec<u8>>,
    cond_stack: Vec<bool>,
    op_count: usize,
    code_separator_index: usize,
    last_codesep_position: u32,
    sigop_budget: Option<i64>,
    flags: Flags,
    version: ScriptVersion,
    sig_ctx: Option<SignatureContext<'a>>,
    secp: Secp256k1<secp256k1::VerifyOnly>,
}

impl<'a> Program<'a> {
    pub fn new(initial_stack: Vec<Vec<u8>>, flags: Flags, version: ScriptVersion, sig_ctx: Option<SignatureContext<'a>>) -> Self {
        Program {
            stack: initial_stack,
            alt_stack: Vec::new(),
            cond_stack: Vec::new(),
            op_count: 0,
            code_separator_index: 0,
            last_codesep_position: 0xffff_ffff,
            sigop_budget: None,
            flags,
            version,
            sig_ctx,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Initialize the BIP342 tapscript sigop budget: `50 + witness_size / 50`.
    pub fn with_tapscript_budget(mut self, witness_size: usize) -> Self {
        self.sigop_budget = Some(
            crate::constants::TAPSCRIPT_SIGOPS_BUDGET_BASE
                + (witness_size / crate::constants::TAPSCRIPT_SIGOPS_PER_WITNESS_BYTE_DIVISOR) as i64,
        );
        self
    }

    fn executing(&self) -> bool {
        self.cond_stack.iter().all(|&b| b)
    }

    fn push_stack_check(&self) -> Result<()> {
        if self.stack.len() + self.alt_stack.len() > MAX_STACK_SIZE {
            return Err(ConsensusError::StackOversize(MAX_STACK_SIZE, crate::constants::MAX_SCRIPT_ELEMENT_SIZE));
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Vec<u8>> {
        self.stack.pop().ok_or(ConsensusError::StackUnderflow)
    }

    fn pop_num(&mut self, max_size: usize) -> Result<ScriptNum> {
        let bytes = self.pop()?;
        ScriptNum::from_bytes(&bytes, true, max_size)
    }

    fn pop_bool(&mut self) -> Result<bool> {
        let bytes = self.pop()?;
        Ok(cast_to_bool(&bytes))
    }

    fn consume_sigop(&mut self) -> Result<()> {
        if let Some(budget) = self.sigop_budget.as_mut() {
            *budget -= 1;
            if *budget < 0 {
                return Err(ConsensusError::SigOpCountExceeded);
            }
        }
        Ok(())
    }

    /// Evaluate every operation of `script` against this program's current
    /// stack, returning whether the script terminated successfully (main
    /// stack non-empty, top true, conditional stack empty). Script
    /// truncation (a trailing underflow operation) always fails.
    pub fn eval(&mut self, script: &Script) -> Result<bool> {
        let ops = script.operations();
        for (index, op) in ops.iter().enumerate() {
            if op.underflow {
                return Err(ConsensusError::UnexpectedEnd("script operation"));
            }
            if let Some(success) = self.step(op, index, ops)? {
                return Ok(success);
            }
        }
        if !self.cond_stack.is_empty() {
            return Err(ConsensusError::UnbalancedConditional);
        }
        Ok(self.stack.last().map(|top| cast_to_bool(top)).unwrap_or(false))
    }

    /// Execute one operation. Returns `Some(true)` when a BIP342
    /// `OP_SUCCESS` terminates the script immediately.
    fn step(&mut self, op: &Operation, index: usize, ops: &[Operation]) -> Result<Option<bool>> {
        let code = op.code;

        if opcode::is_always_invalid(code) {
            return Err(ConsensusError::DisabledOpcode);
        }
        if opcode::is_success_candidate(code) {
            if self.version == ScriptVersion::V1Tapscript && self.flags.contains(Flags::BIP342) {
                return Ok(Some(true));
            }
            return Err(ConsensusError::DisabledOpcode);
        }
        if opcode::is_counted(code) {
            self.op_count += 1;
            if self.op_count > MAX_SCRIPT_OPS {
                return Err(ConsensusError::OpCountExceeded(MAX_SCRIPT_OPS));
            }
        }

        let executing = self.executing();
        let is_conditional_op = matches!(code, opcode::IF | opcode::NOTIF | opcode::ELSE | opcode::ENDIF);
        if !executing && !is_conditional_op {
            return Ok(None);
        }

        if opcode::is_push(code) || opcode::is_small_number(code) || code == opcode::RESERVED_80 {
            if executing {
                if op.is_oversized() {
                    return Err(ConsensusError::OversizePush(op.data.len()));
                }
                if code == opcode::RESERVED_80 {
                    return Err(ConsensusError::BadOpcode);
                }
                let value = if opcode::is_small_number(code) { ScriptNum(opcode::small_number_value(code)).to_bytes() } else { op.data.clone() };
                self.stack.push(value);
                self.push_stack_check()?;
            }
            return Ok(None);
        }

        match code {
            opcode::NOP | opcode::NOP1 | opcode::NOP4 | opcode::NOP5 | opcode::NOP6 | opcode::NOP7 | opcode::NOP8 | opcode::NOP9 | opcode::NOP10 => {}

            opcode::IF | opcode::NOTIF => {
                let value = if executing { self.pop_bool()? } else { false };
                self.cond_stack.push(if code == opcode::IF { value } else { !value });
            }
            opcode::ELSE => {
                let top = self.cond_stack.last_mut().ok_or(ConsensusError::UnbalancedConditional)?;
                *top = !*top;
            }
            opcode::ENDIF => {
                self.cond_stack.pop().ok_or(ConsensusError::UnbalancedConditional)?;
            }

            opcode::VERIFY => {
                if !self.pop_bool()? {
                    return Err(ConsensusError::VerifyFailed);
                }
            }
            opcode::RETURN => return Err(ConsensusError::VerifyFailed),

            opcode::TOALTSTACK => {
                let v = self.pop()?;
                self.alt_stack.push(v);
            }
            opcode::FROMALTSTACK => {
                let v = self.alt_stack.pop().ok_or(ConsensusError::StackUnderflow)?;
                self.stack.push(v);
            }
            opcode::DROP2 => {
                self.pop()?;
                self.pop()?;
            }
            opcode::DUP2 => self.dup_n(2)?,
            opcode::DUP3 => self.dup_n(3)?,
            opcode::OVER2 => {
                let len = self.stack.len();
                if len < 4 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack.push(self.stack[len - 4].clone());
                self.stack.push(self.stack[len - 3].clone());
            }
            opcode::ROT2 => {
                let len = self.stack.len();
                if len < 6 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack[len - 6..].rotate_left(2);
            }
            opcode::SWAP2 => {
                let len = self.stack.len();
                if len < 4 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack.swap(len - 4, len - 2);
                self.stack.swap(len - 3, len - 1);
            }
            opcode::IFDUP => {
                let top = self.stack.last().ok_or(ConsensusError::StackUnderflow)?.clone();
                if cast_to_bool(&top) {
                    self.stack.push(top);
                }
            }
            opcode::DEPTH => {
                let depth = self.stack.len() as i64;
                self.stack.push(ScriptNum(depth).to_bytes());
            }
            opcode::DROP => {
                self.pop()?;
            }
            opcode::DUP => {
                let top = self.stack.last().ok_or(ConsensusError::StackUnderflow)?.clone();
                self.stack.push(top);
            }
            opcode::NIP => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack.remove(len - 2);
            }
            opcode::OVER => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack.push(self.stack[len - 2].clone());
            }
            opcode::PICK | opcode::ROLL => {
                let n = self.pop_num(4)?.0;
                if n < 0 || n as usize >= self.stack.len() {
                    return Err(ConsensusError::StackUnderflow);
                }
                let idx = self.stack.len() - 1 - n as usize;
                let value = if code == opcode::ROLL { self.stack.remove(idx) } else { self.stack[idx].clone() };
                self.stack.push(value);
            }
            opcode::ROT => {
                let len = self.stack.len();
                if len < 3 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack[len - 3..].rotate_left(1);
            }
            opcode::SWAP => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ConsensusError::StackUnderflow);
                }
                self.stack.swap(len - 2, len - 1);
            }
            opcode::TUCK => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ConsensusError::StackUnderflow);
                }
                let top = self.stack[len - 1].clone();
                self.stack.insert(len - 2, top);
            }
            opcode::SIZE => {
                let len = self.stack.last().ok_or(ConsensusError::StackUnderflow)?.len() as i64;
                self.stack.push(ScriptNum(len).to_bytes());
            }
            opcode::EQUAL => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(ScriptNum(if a == b { 1 } else { 0 }).to_bytes());
            }
            opcode::EQUALVERIFY => {
                let b = self.pop()?;
                let a = self.pop()?;
                if a != b {
                    return Err(ConsensusError::EqualVerifyFailed);
                }
            }
            opcode::ADD1 => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a + 1).to_bytes());
            }
            opcode::SUB1 => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a - 1).to_bytes());
            }
            opcode::NEGATE => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(-a).to_bytes());
            }
            opcode::ABS => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a.abs()).to_bytes());
            }
            opcode::NOT => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a == 0 { 1 } else { 0 }).to_bytes());
            }
            opcode::NONZERO => {
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a != 0 { 1 } else { 0 }).to_bytes());
            }
            opcode::ADD => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a + b).to_bytes());
            }
            opcode::SUB => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a - b).to_bytes());
            }
            opcode::BOOLAND => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a != 0 && b != 0 { 1 } else { 0 }).to_bytes());
            }
            opcode::BOOLOR => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a != 0 || b != 0 { 1 } else { 0 }).to_bytes());
            }
            opcode::NUMEQUAL => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a == b { 1 } else { 0 }).to_bytes());
            }
            opcode::NUMEQUALVERIFY => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                if a != b {
                    return Err(ConsensusError::EqualVerifyFailed);
                }
            }
            opcode::NUMNOTEQUAL => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a != b { 1 } else { 0 }).to_bytes());
            }
            opcode::LESSTHAN => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a < b { 1 } else { 0 }).to_bytes());
            }
            opcode::GREATERTHAN => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a > b { 1 } else { 0 }).to_bytes());
            }
            opcode::LESSTHANOREQUAL => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a <= b { 1 } else { 0 }).to_bytes());
            }
            opcode::GREATERTHANOREQUAL => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if a >= b { 1 } else { 0 }).to_bytes());
            }
            opcode::MIN => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a.min(b)).to_bytes());
            }
            opcode::MAX => {
                let b = self.pop_num(4)?.0;
                let a = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(a.max(b)).to_bytes());
            }
            opcode::WITHIN => {
                let max = self.pop_num(4)?.0;
                let min = self.pop_num(4)?.0;
                let x = self.pop_num(4)?.0;
                self.stack.push(ScriptNum(if x >= min && x < max { 1 } else { 0 }).to_bytes());
            }
            opcode::RIPEMD160 => {
                let v = self.pop()?;
                self.stack.push(ripemd160(&v).to_vec());
            }
            opcode::SHA1 => {
                let v = self.pop()?;
                self.stack.push(sha1(&v).to_vec());
            }
            opcode::SHA256 => {
                let v = self.pop()?;
                self.stack.push(sha256(&v).to_vec());
            }
            opcode::HASH160 => {
                let v = self.pop()?;
                self.stack.push(hash160(&v).to_vec());
            }
            opcode::HASH256 => {
                let v = self.pop()?;
                self.stack.push(hash256(&v).to_vec());
            }
            opcode::CODESEPARATOR => {
                self.code_separator_index = index + 1;
                self.last_codesep_position = index as u32;
            }
            opcode::CHECKSIG | opcode::CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                let ok = self.check_signature(&signature, &pubkey, ops)?;
                if code == opcode::CHECKSIGVERIFY {
                    if !ok {
                        return Err(ConsensusError::VerifyFailed);
                    }
                } else {
                    self.stack.push(ScriptNum(if ok { 1 } else { 0 }).to_bytes());
                }
            }
            opcode::CHECKSIGADD => {
                if self.version != ScriptVersion::V1Tapscript {
                    return Err(ConsensusError::BadOpcode);
                }
                let n = self.pop_num(4)?.0;
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                self.consume_sigop()?;
                let ok = self.check_schnorr_signature(&signature, &pubkey)?;
                self.stack.push(ScriptNum(if ok { n + 1 } else { n }).to_bytes());
            }
            opcode::CHECKMULTISIG | opcode::CHECKMULTISIGVERIFY => {
                let ok = self.check_multisig(ops)?;
                if code == opcode::CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ConsensusError::VerifyFailed);
                    }
                } else {
                    self.stack.push(ScriptNum(if ok { 1 } else { 0 }).to_bytes());
                }
            }
            opcode::CHECKLOCKTIMEVERIFY => {
                if !self.flags.contains(Flags::BIP65) {
                    return Ok(None);
                }
                self.check_locktime()?;
            }
            opcode::CHECKSEQUENCEVERIFY => {
                if !self.flags.contains(Flags::BIP112) {
                    return Ok(None);
                }
                self.check_sequence()?;
            }
            _ => return Err(ConsensusError::BadOpcode),
        }
        Ok(None)
    }

    fn dup_n(&mut self, n: usize) -> Result<()> {
        let len = self.stack.len();
        if len < n {
            return Err(ConsensusError::StackUnderflow);
        }
        for item in self.stack[len - n..].to_vec() {
            self.stack.push(item);
        }
        Ok(())
    }

    fn subscript(&self, ops: &[Operation]) -> Script {
        let tail = &ops[self.code_separator_index..];
        let bytes = crate::chain::script::serialize_operations(tail);
        Script::parse(&bytes).unwrap_or_else(|_| Script::empty())
    }

    fn check_locktime(&mut self) -> Result<()> {
        let sig_ctx = self.sig_ctx.as_ref().ok_or(ConsensusError::UnsatisfiedLocktime)?;
        let top = self.stack.last().ok_or(ConsensusError::StackUnderflow)?;
        let n = ScriptNum::from_bytes(top, true, crate::constants::MAX_LOCKTIME_SCRIPTNUM_BYTES)?.0;
        if n < 0 {
            return Err(ConsensusError::NegativeLocktime);
        }
        let tx = sig_ctx.tx;
        let input = tx.inputs().get(sig_ctx.input_index).ok_or(ConsensusError::InvalidInputIndex(sig_ctx.input_index))?;
        if input.is_final() {
            return Err(ConsensusError::UnsatisfiedLocktime);
        }
        let threshold = crate::constants::LOCKTIME_THRESHOLD as i64;
        let locktime = tx.lock_time() as i64;
        if (n < threshold) != (locktime < threshold) {
            return Err(ConsensusError::UnsatisfiedLocktime);
        }
        if n > locktime {
            return Err(ConsensusError::UnsatisfiedLocktime);
        }
        Ok(())
    }

    fn check_sequence(&mut self) -> Result<()> {
        let sig_ctx = self.sig_ctx.as_ref().ok_or(ConsensusError::UnsatisfiedLocktime)?;
        let top = self.stack.last().ok_or(ConsensusError::StackUnderflow)?;
        let n = ScriptNum::from_bytes(top, true, crate::constants::MAX_LOCKTIME_SCRIPTNUM_BYTES)?.0;
        if n < 0 {
            return Err(ConsensusError::NegativeLocktime);
        }
        let n = n as u32;
        if n & crate::constants::SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Ok(());
        }
        let tx = sig_ctx.tx;
        if tx.version() < 2 {
            return Err(ConsensusError::RelativeLockUnsatisfied);
        }
        let sequence = tx.inputs()[sig_ctx.input_index].sequence;
        if sequence & crate::constants::SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Err(ConsensusError::RelativeLockUnsatisfied);
        }
        let type_mask = crate::constants::SEQUENCE_LOCKTIME_TYPE_FLAG;
        if (n & type_mask) != (sequence & type_mask) {
            return Err(ConsensusError::RelativeLockUnsatisfied);
        }
        let mask = crate::constants::SEQUENCE_LOCKTIME_MASK;
        if n & mask > sequence & mask {
            return Err(ConsensusError::RelativeLockUnsatisfied);
        }
        Ok(())
    }

    fn check_signature(&mut self, signature: &[u8], pubkey: &[u8], ops: &[Operation]) -> Result<bool> {
        if signature.is_empty() {
            return Ok(false);
        }
        match self.version {
            ScriptVersion::V1Tapscript => {
                self.consume_sigop()?;
                self.check_schnorr_signature(signature, pubkey)
            }
            _ => {
                self.consume_sigop()?;
                let hash_type = *signature.last().unwrap();
                let der = &signature[..signature.len() - 1];
                if self.flags.contains(Flags::BIP66) {
                    sighash::validate_legacy_sighash_type(hash_type)?;
                } else if self.version == ScriptVersion::V0 {
                    sighash::validate_legacy_sighash_type(hash_type)?;
                }
                // Strict DER is a BIP66 rule; before activation, mainnet history
                // contains signatures only a lax parser accepts.
                let sig = if self.flags.contains(Flags::BIP66) {
                    ecc::parse_der_signature(der)?
                } else {
                    ecc::parse_der_signature_lax(der)
                };
                // BIP62/141: witness-program signatures must be low-S.
                if self.version == ScriptVersion::V0 && !ecc::is_low_s(&sig) {
                    return Err(ConsensusError::SignatureNotLowS);
                }
                let key = ecc::parse_public_key(pubkey)?;
                let sig_ctx = self.sig_ctx.as_ref().ok_or(ConsensusError::MissingPrevout(0))?;
                let subscript = self.subscript(ops);
                let sighash = match self.version {
                    ScriptVersion::V0 => sighash::v0_sighash(sig_ctx.tx, sig_ctx.input_index, &subscript, sig_ctx.amount, hash_type)?,
                    _ => sighash::legacy_sighash(sig_ctx.tx, sig_ctx.input_index, &subscript, signature, hash_type)?,
                };
                Ok(ecc::verify_ecdsa(&self.secp, &sighash, &sig, &key).is_ok())
            }
        }
    }

    fn check_schnorr_signature(&mut self, signature: &[u8], pubkey: &[u8]) -> Result<bool> {
        if signature.is_empty() {
            return Ok(false);
        }
        if pubkey.len() != 32 {
            // Unknown public key type: forward-compatible no-op success
            // per BIP342, except the empty-signature case handled above.
            return Ok(true);
        }
        let (sig_bytes, hash_type) = match signature.len() {
            64 => (signature, sighash::SIGHASH_DEFAULT),
            65 => (&signature[..64], signature[64]),
            _ => return Err(ConsensusError::BadSignatureEncoding),
        };
        sighash::validate_taproot_sighash_type(hash_type)?;
        let key = ecc::parse_xonly_public_key(pubkey)?;
        let sig_ctx = self.sig_ctx.as_ref().ok_or(ConsensusError::MissingPrevout(0))?;
        let tapscript_ext = sig_ctx.tapleaf_hash.map(|tapleaf_hash| TapscriptExt { tapleaf_hash, codesep_position: self.last_codesep_position });
        let digest = sighash::v1_sighash(sig_ctx.tx, sig_ctx.input_index, hash_type, sig_ctx.annex, tapscript_ext.as_ref())?;
        let mut sig_array = [0u8; 64];
        sig_array.copy_from_slice(sig_bytes);
        Ok(ecc::verify_schnorr(&self.secp, &digest, &sig_array, &key).is_ok())
    }

    fn check_multisig(&mut self, ops: &[Operation]) -> Result<bool> {
        if self.version == ScriptVersion::V1Tapscript {
            return Err(ConsensusError::BadOpcode);
        }
        let pubkey_count = self.pop_num(4)?.0;
        if !(0..=20).contains(&pubkey_count) {
            return Err(ConsensusError::NumberOverflow);
        }
        self.op_count += pubkey_count as usize;
        if self.op_count > MAX_SCRIPT_OPS {
            return Err(ConsensusError::OpCountExceeded(MAX_SCRIPT_OPS));
        }
        let mut pubkeys = Vec::with_capacity(pubkey_count as usize);
        for _ in 0..pubkey_count {
            pubkeys.push(self.pop()?);
        }
        let sig_count = self.pop_num(4)?.0;
        if sig_count < 0 || sig_count > pubkey_count {
            return Err(ConsensusError::NumberOverflow);
        }
        let mut signatures = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            signatures.push(self.pop()?);
        }
        let dummy = self.pop()?;
        if self.flags.contains(Flags::BIP147) && !dummy.is_empty() {
            return Err(ConsensusError::VerifyFailed);
        }
        if signatures.len() as u64 > crate::constants::MAX_SCRIPT_SIGOPS as u64 {
            return Err(ConsensusError::SigOpCountExceeded);
        }

        let mut key_index = 0usize;
        for signature in &signatures {
            let mut matched = false;
            while key_index < pubkeys.len() {
                let pubkey = &pubkeys[pubkeys.len() - 1 - key_index];
                key_index += 1;
                if self.check_signature(signature, pubkey, ops)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::context::Forks;

    fn run(script_bytes: &[u8], initial_stack: Vec<Vec<u8>>) -> Result<bool> {
        let script = Script::parse(script_bytes).unwrap();
        let mut program = Program::new(initial_stack, Forks::all().reduce(), ScriptVersion::Unversioned, None);
        program.eval(&script)
    }

    #[test]
    fn test_simple_true() {
        assert!(run(&[opcode::PUSH_POSITIVE_1], vec![]).unwrap());
    }

    #[test]
    fn test_op_return_fails() {
        assert!(run(&[opcode::RETURN], vec![]).is_err());
    }

    #[test]
    fn test_op_add() {
        let push_2 = opcode::RESERVED_80 + 2;
        assert!(run(&[opcode::PUSH_POSITIVE_1, opcode::PUSH_POSITIVE_1, opcode::ADD, push_2, opcode::NUMEQUAL], vec![]).unwrap());
    }

    #[test]
    fn test_op_if_else() {
        let bytes = [opcode::PUSH_SIZE_0, opcode::IF, opcode::PUSH_SIZE_0, opcode::ELSE, opcode::PUSH_POSITIVE_1, opcode::ENDIF];
        assert!(run(&bytes, vec![]).unwrap());
    }

    #[test]
    fn test_unbalanced_conditional_fails() {
        assert!(run(&[opcode::IF], vec![]).is_err());
    }

    #[test]
    fn test_disabled_opcode_fails_outside_tapscript() {
        assert!(run(&[opcode::CAT], vec![]).is_err());
    }

    #[test]
    fn test_op_verif_always_invalid() {
        assert!(run(&[opcode::VERIF], vec![]).is_err());
    }

    #[test]
    fn test_success_opcode_under_tapscript() {
        let script = Script::parse(&[opcode::CAT]).unwrap();
        let mut program = Program::new(vec![], Forks::all().reduce(), ScriptVersion::V1Tapscript, None);
        assert!(program.eval(&script).unwrap());
    }

    #[test]
    fn test_stack_underflow() {
        assert!(run(&[opcode::ADD], vec![]).is_err());
    }

    #[test]
    fn test_script_num_round_trip() {
        for value in [0i64, 1, -1, 255, -255, 65535, -65535, i32::MAX as i64] {
            let encoded = ScriptNum(value).to_bytes();
            let decoded = ScriptNum::from_bytes(&encoded, true, 5).unwrap();
            assert_eq!(decoded.0, value);
        }
    }

    #[test]
    fn test_non_minimal_number_rejected() {
        assert!(ScriptNum::from_bytes(&[0x01, 0x00], true, 4).is_err());
        assert!(ScriptNum::from_bytes(&[0x01, 0x00], false, 4).is_ok());
    }

    #[test]
    fn test_cast_to_bool_trailing_sign_byte() {
        assert!(!cast_to_bool(&[0x80]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x01, 0x80]));
    }

    #[test]
    fn test_op_roll() {
        let push_2 = opcode::RESERVED_80 + 2;
        let push_3 = opcode::RESERVED_80 + 3;
        assert!(run(
            &[opcode::PUSH_POSITIVE_1, push_2, push_3, push_2, opcode::ROLL, opcode::PUSH_POSITIVE_1, opcode::NUMEQUAL],
            vec![]
        )
        .unwrap());
    }
}
