//! Script and Operation (C4) — Orange Paper Section 3 / 4.4, opcode table
//! from Section 4.6 / 4.11 (full 256-entry classification).

use crate::codec::{Reader, Writer};
use crate::constants::{MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE};
use crate::error::{ConsensusError, Result};
use std::sync::Arc;

/// Named opcode constants. Values follow the full 256-entry libbitcoin
/// enumeration; unlisted bytes in 187..=255 are anonymous reserved
/// opcodes reached only through `Opcode::classify`.
pub mod opcode {
    pub const PUSH_SIZE_0: u8 = 0;
    pub const PUSH_SIZE_75: u8 = 75;
    pub const PUSHDATA1: u8 = 76;
    pub const PUSHDATA2: u8 = 77;
    pub const PUSHDATA4: u8 = 78;
    pub const PUSH_NEGATE_1: u8 = 79;
    pub const RESERVED_80: u8 = 80;
    pub const PUSH_POSITIVE_1: u8 = 81;
    pub const PUSH_POSITIVE_16: u8 = 96;
    pub const NOP: u8 = 97;
    pub const OP_VER: u8 = 98;
    pub const IF: u8 = 99;
    pub const NOTIF: u8 = 100;
    pub const VERIF: u8 = 101;
    pub const VERNOTIF: u8 = 102;
    pub const ELSE: u8 = 103;
    pub const ENDIF: u8 = 104;
    pub const VERIFY: u8 = 105;
    pub const RETURN: u8 = 106;
    pub const TOALTSTACK: u8 = 107;
    pub const FROMALTSTACK: u8 = 108;
    pub const DROP2: u8 = 109;
    pub const DUP2: u8 = 110;
    pub const DUP3: u8 = 111;
    pub const OVER2: u8 = 112;
    pub const ROT2: u8 = 113;
    pub const SWAP2: u8 = 114;
    pub const IFDUP: u8 = 115;
    pub const DEPTH: u8 = 116;
    pub const DROP: u8 = 117;
    pub const DUP: u8 = 118;
    pub const NIP: u8 = 119;
    pub const OVER: u8 = 120;
    pub const PICK: u8 = 121;
    pub const ROLL: u8 = 122;
    pub const ROT: u8 = 123;
    pub const SWAP: u8 = 124;
    pub const TUCK: u8 = 125;
    pub const CAT: u8 = 126;
    pub const SUBSTR: u8 = 127;
    pub const LEFT: u8 = 128;
    pub const RIGHT: u8 = 129;
    pub const SIZE: u8 = 130;
    pub const INVERT: u8 = 131;
    pub const AND: u8 = 132;
    pub const OR: u8 = 133;
    pub const XOR: u8 = 134;
    pub const EQUAL: u8 = 135;
    pub const EQUALVERIFY: u8 = 136;
    pub const RESERVED_137: u8 = 137;
    pub const RESERVED_138: u8 = 138;
    pub const ADD1: u8 = 139;
    pub const SUB1: u8 = 140;
    pub const MUL2: u8 = 141;
    pub const DIV2: u8 = 142;
    pub const NEGATE: u8 = 143;
    pub const ABS: u8 = 144;
    pub const NOT: u8 = 145;
    pub const NONZERO: u8 = 146;
    pub const ADD: u8 = 147;
    pub const SUB: u8 = 148;
    pub const MUL: u8 = 149;
    pub const DIV: u8 = 150;
    pub const MOD: u8 = 151;
    pub const LSHIFT: u8 = 152;
    pub const RSHIFT: u8 = 153;
    pub const BOOLAND: u8 = 154;
    pub const BOOLOR: u8 = 155;
    pub const NUMEQUAL: u8 = 156;
    pub const NUMEQUALVERIFY: u8 = 157;
    pub const NUMNOTEQUAL: u8 = 158;
    pub const LESSTHAN: u8 = 159;
    pub const GREATERTHAN: u8 = 160;
    pub const LESSTHANOREQUAL: u8 = 161;
    pub const GREATERTHANOREQUAL: u8 = 162;
    pub const MIN: u8 = 163;
    pub const MAX: u8 = 164;
    pub const WITHIN: u8 = 165;
    pub const RIPEMD160: u8 = 166;
    pub const SHA1: u8 = 167;
    pub const SHA256: u8 = 168;
    pub const HASH160: u8 = 169;
    pub const HASH256: u8 = 170;
    pub const CODESEPARATOR: u8 = 171;
    pub const CHECKSIG: u8 = 172;
    pub const CHECKSIGVERIFY: u8 = 173;
    pub const CHECKMULTISIG: u8 = 174;
    pub const CHECKMULTISIGVERIFY: u8 = 175;
    pub const NOP1: u8 = 176;
    pub const CHECKLOCKTIMEVERIFY: u8 = 177;
    pub const CHECKSEQUENCEVERIFY: u8 = 178;
    pub const NOP4: u8 = 179;
    pub const NOP5: u8 = 180;
    pub const NOP6: u8 = 181;
    pub const NOP7: u8 = 182;
    pub const NOP8: u8 = 183;
    pub const NOP9: u8 = 184;
    pub const NOP10: u8 = 185;
    pub const CHECKSIGADD: u8 = 186;

    /// Opcodes permanently invalid in every evaluation context, with no
    /// BIP342 success exception (`op_verif`/`op_vernotif` in the original
    /// enumeration).
    pub fn is_always_invalid(op: u8) -> bool {
        matches!(op, VERIF | VERNOTIF)
    }

    /// Opcodes that succeed the script immediately under BIP342 tapscript
    /// evaluation, and are invalid/reserved bad-opcode failures anywhere
    /// else. Matches the `is_success[bip342]` annotations in the original
    /// opcode enumeration, excluding `op_verif`/`op_vernotif` (always
    /// invalid) and `checksigadd` (186, real semantics under bip342).
    pub fn is_success_candidate(op: u8) -> bool {
        matches!(
            op,
            RESERVED_80
                | OP_VER
                | CAT
                | SUBSTR
                | LEFT
                | RIGHT
                | INVERT
                | AND
                | OR
                | XOR
                | RESERVED_137
                | RESERVED_138
                | MUL2
                | DIV2
                | MUL
                | DIV
                | MOD
                | LSHIFT
                | RSHIFT
        ) || op >= 187
    }

    /// True for push opcodes whose operand is read from the script body
    /// (direct-length pushes and PUSHDATA1/2/4); excludes the numeric
    /// pushes `push_negative_1`/`push_positive_N` whose value is the
    /// opcode byte itself.
    pub fn is_push(op: u8) -> bool {
        op <= PUSHDATA4
    }

    /// True for the numeric-push opcodes (-1, 1..=16) whose value is
    /// encoded in the opcode byte with no following data.
    pub fn is_small_number(op: u8) -> bool {
        op == PUSH_NEGATE_1 || (PUSH_POSITIVE_1..=PUSH_POSITIVE_16).contains(&op)
    }

    pub fn small_number_value(op: u8) -> i64 {
        if op == PUSH_NEGATE_1 {
            -1
        } else {
            (op - RESERVED_80) as i64
        }
    }

    /// Opcodes whose execution increments the per-script operation counter
    /// (everything past OP_16).
    pub fn is_counted(op: u8) -> bool {
        op > PUSH_POSITIVE_16
    }
}

/// One decoded script element. Push opcodes (`0..=78`) carry their literal
/// in `data`; the small-number pushes (`push_negative_1`, `1..=16`) and all
/// other opcodes carry an empty `data` since their value is the opcode
/// byte itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub code: u8,
    pub data: Vec<u8>,
    /// Set when the script was truncated mid-push: the declared push
    /// length exceeded the remaining bytes. Such an operation always
    /// fails evaluation (spec.md: "truncation is preserved as an underflow
    /// operation that fails evaluation") rather than being rejected at
    /// parse time.
    pub underflow: bool,
}

impl Operation {
    pub fn is_oversized(&self) -> bool {
        self.data.len() > MAX_SCRIPT_ELEMENT_SIZE
    }

    fn parse_one(reader: &mut Reader) -> Operation {
        let code = reader.read_u8();
        if !reader.is_valid() {
            return Operation { code: 0, data: Vec::new(), underflow: true };
        }
        if opcode::is_push(code) {
            let len = if code <= opcode::PUSH_SIZE_75 {
                code as usize
            } else if code == opcode::PUSHDATA1 {
                reader.read_u8() as usize
            } else if code == opcode::PUSHDATA2 {
                reader.read_u16_le() as usize
            } else {
                reader.read_u32_le() as usize
            };
            if !reader.is_valid() || len > reader.remaining() {
                return Operation { code, data: Vec::new(), underflow: true };
            }
            let data = reader.read_bytes(len).to_vec();
            Operation { code, data, underflow: false }
        } else {
            Operation { code, data: Vec::new(), underflow: false }
        }
    }
}

/// Derived, script-wide properties computed once at construction so the
/// interpreter and program driver never rescan the operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptProperties {
    /// Contains an opcode that is a no-op success under BIP342 tapscript
    /// and otherwise reserved/invalid.
    pub easier: bool,
    /// Contains an opcode that is unconditionally invalid in every
    /// non-tapscript context (and, for `op_verif`/`op_vernotif`, in every
    /// context).
    pub failer: bool,
    /// Contains `OP_ROLL`.
    pub roller: bool,
}

#[derive(Debug)]
struct ScriptInner {
    bytes: Vec<u8>,
    ops: Vec<Operation>,
    properties: ScriptProperties,
}

/// An ordered sequence of operations, immutable and cheaply cloneable via
/// shared ownership of its inner payload (Orange Paper Section 9: shared
/// ownership of chain entities).
#[derive(Debug, Clone)]
pub struct Script {
    inner: Arc<ScriptInner>,
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.inner.bytes == other.inner.bytes
    }
}
impl Eq for Script {}

impl Script {
    /// Parse a bare opcode/data stream (no length prefix in place; callers
    /// reading a length-prefixed context read the prefix separately and
    /// hand this function the exact byte span).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_SCRIPT_SIZE {
            return Err(ConsensusError::OversizeScript(bytes.len()));
        }
        let mut reader = Reader::new(bytes);
        let mut ops = Vec::new();
        while !reader.is_exhausted() {
            let op = Operation::parse_one(&mut reader);
            let stop = op.underflow;
            ops.push(op);
            if stop {
                break;
            }
        }
        let properties = Self::compute_properties(&ops);
        Ok(Script { inner: Arc::new(ScriptInner { bytes: bytes.to_vec(), ops, properties }) })
    }

    pub fn empty() -> Self {
        Script { inner: Arc::new(ScriptInner { bytes: Vec::new(), ops: Vec::new(), properties: ScriptProperties::default() }) }
    }

    fn compute_properties(ops: &[Operation]) -> ScriptProperties {
        let mut properties = ScriptProperties::default();
        for op in ops {
            if op.underflow {
                properties.failer = true;
                continue;
            }
            if opcode::is_always_invalid(op.code) {
                properties.failer = true;
            } else if opcode::is_success_candidate(op.code) {
                properties.easier = true;
                properties.failer = true;
            }
            if op.code == opcode::ROLL {
                properties.roller = true;
            }
        }
        properties
    }

    pub fn operations(&self) -> &[Operation] {
        &self.inner.ops
    }

    pub fn properties(&self) -> ScriptProperties {
        self.inner.properties
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// True when every operation is a push (used by the BIP16 input-script
    /// gate and by the segwit P2WSH/P2SH-wrapped-segwit input script rule).
    pub fn is_push_only(&self) -> bool {
        self.inner.ops.iter().all(|op| opcode::is_push(op.code) || opcode::is_small_number(op.code) || op.code == opcode::RESERVED_80)
    }

    /// Read a script preceded by a varint length prefix (the form used
    /// inside transaction inputs/outputs).
    pub fn read_var(reader: &mut Reader) -> Result<Self> {
        let bytes = reader.read_var_bytes();
        if !reader.is_valid() {
            return Err(ConsensusError::UnexpectedEnd("script"));
        }
        Self::parse(&bytes)
    }

    pub fn write_var(&self, writer: &mut Writer) -> Result<()> {
        writer.write_var_bytes(&self.inner.bytes)
    }

    /// P2SH recognition pattern: `HASH160 <20 bytes> EQUAL`.
    pub fn is_pay_to_script_hash(&self) -> Option<&[u8]> {
        let ops = &self.inner.ops;
        if ops.len() == 3
            && ops[0].code == opcode::HASH160
            && ops[1].code == 20
            && ops[1].data.len() == 20
            && ops[2].code == opcode::EQUAL
        {
            return Some(&ops[1].data);
        }
        None
    }

    /// Witness program recognition: a single push of the version opcode
    /// (`OP_0` or `OP_1..OP_16`) followed by a single push of 2..=40 bytes.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        let ops = &self.inner.ops;
        if ops.len() != 2 {
            return None;
        }
        let version = if ops[0].code == opcode::PUSH_SIZE_0 {
            0u8
        } else if (opcode::PUSH_POSITIVE_1..=opcode::PUSH_POSITIVE_16).contains(&ops[0].code) {
            ops[0].code - opcode::RESERVED_80
        } else {
            return None;
        };
        let program = &ops[1].data;
        if ops[1].code as usize != program.len() || program.len() < 2 || program.len() > 40 {
            return None;
        }
        Some((version, program))
    }
}

/// Reserialize a (possibly filtered) operation list back to bytes,
/// reproducing the original push-width encoding exactly (each push
/// operation's `code` already records which of the four push encodings
/// was used). Used by the legacy sighash engine's `find_and_delete`.
pub fn serialize_operations(ops: &[Operation]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in ops {
        out.push(op.code);
        if opcode::is_push(op.code) && op.code > opcode::PUSH_SIZE_75 {
            let len = op.data.len();
            if op.code == opcode::PUSHDATA1 {
                out.push(len as u8);
            } else if op.code == opcode::PUSHDATA2 {
                out.extend_from_slice(&(len as u16).to_le_bytes());
            } else {
                out.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        if opcode::is_push(op.code) {
            out.extend_from_slice(&op.data);
        }
    }
    out
}
