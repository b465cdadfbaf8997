//! Consensus error taxonomy from Orange Paper Section 7 (Error Handling Design)
//!
//! Errors are *kinds*, not strings: every validation failure maps to one
//! of the variants below. No operation in this crate panics or throws;
//! failure is always surfaced through `Result<T, ConsensusError>`.

use thiserror::Error;

/// Crate-wide result alias, matching the teacher's `crate::error::Result` convention.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// A single consensus/parsing/script failure kind.
///
/// Grouped by the families of Orange Paper Section 7: parse/framing,
/// structural, script, signature, witness, consensus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // ---- Parse / framing ------------------------------------------------
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEnd(&'static str),
    #[error("{0} exceeds declared reader limit")]
    Oversize(&'static str),
    #[error("invalid varint encoding")]
    InvalidVarint,
    #[error("sink overflow writing {0}")]
    SinkOverflow(&'static str),

    // ---- Structural -------------------------------------------------------
    #[error("transaction has no inputs")]
    EmptyInputs,
    #[error("transaction has no outputs")]
    EmptyOutputs,
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("script exceeds {MAX_SCRIPT_SIZE}-byte limit (got {0})", MAX_SCRIPT_SIZE = crate::constants::MAX_SCRIPT_SIZE)]
    OversizeScript(usize),
    #[error("pushed data exceeds {MAX_SCRIPT_ELEMENT_SIZE}-byte limit (got {0})", MAX_SCRIPT_ELEMENT_SIZE = crate::constants::MAX_SCRIPT_ELEMENT_SIZE)]
    OversizePush(usize),
    #[error("coinbase script size {0} outside [2, 100]")]
    InvalidCoinbaseSize(usize),
    #[error("transaction exceeds maximum serialized size")]
    OversizeTransaction,
    #[error("output value {0} out of range")]
    InvalidOutputValue(i64),
    #[error("sum of output values exceeds MAX_MONEY")]
    OutputValueOverflow,
    #[error("non-coinbase input references the null outpoint")]
    NullNonCoinbaseInput,
    #[error("transaction contains an internal double-spend")]
    InternalDoubleSpend,
    #[error("first transaction of a block is not coinbase, or a later one is")]
    MisplacedCoinbase,

    // ---- Script -----------------------------------------------------------
    #[error("bad opcode encountered")]
    BadOpcode,
    #[error("disabled opcode encountered")]
    DisabledOpcode,
    #[error("unbalanced conditional (IF/NOTIF without matching ENDIF)")]
    UnbalancedConditional,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack exceeds {0} entries or an entry exceeds {1} bytes")]
    StackOversize(usize, usize),
    #[error("operation count exceeds {0}")]
    OpCountExceeded(usize),
    #[error("signature operation count exceeds budget")]
    SigOpCountExceeded,
    #[error("OP_VERIFY / equivalent failed")]
    VerifyFailed,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerifyFailed,
    #[error("negative locktime operand")]
    NegativeLocktime,
    #[error("locktime/sequence requirement not satisfied")]
    UnsatisfiedLocktime,
    #[error("minimally-encoded number required")]
    NonMinimalNumber,
    #[error("number exceeds maximum byte length for this context")]
    NumberOverflow,
    #[error("non-push operation in P2SH/segwit input script")]
    NonPushInInputScript,

    // ---- Signature --------------------------------------------------------
    #[error("malformed DER signature")]
    BadSignatureEncoding,
    #[error("hash type {0:#x} is not in the allowed set")]
    HashTypeNotInSet(u8),
    #[error("malformed public key encoding")]
    BadPubkeyEncoding,
    #[error("ECDSA signature verification failed")]
    EcdsaVerifyFailed,
    #[error("Schnorr signature verification failed")]
    SchnorrVerifyFailed,
    #[error("signature is not low-S under the active policy")]
    SignatureNotLowS,

    // ---- Witness ----------------------------------------------------------
    #[error("witness data present on a non-witness-program output")]
    UnexpectedWitness,
    #[error("malformed witness")]
    MalformedWitness,
    #[error("witness program length/version mismatch")]
    WitnessProgramMismatch,
    #[error("witness script hash does not match the committed program")]
    WitnessProgramHashMismatch,
    #[error("Taproot control block is invalid")]
    InvalidControlBlock,
    #[error("annex present without BIP341 support")]
    UnexpectedAnnex,

    // ---- Consensus ----------------------------------------------------------
    #[error("sum of inputs is less than sum of outputs")]
    Overspent,
    #[error("coinbase output spent before maturity")]
    CoinbaseNotMature,
    #[error("BIP68 relative lock not satisfied")]
    RelativeLockUnsatisfied,
    #[error("absolute locktime not satisfied")]
    AbsoluteLockUnsatisfied,
    #[error("input spends an already-confirmed output")]
    ConfirmedDoubleSpend,
    #[error("prevout metadata missing for input {0}")]
    MissingPrevout(usize),
    #[error("confirmation metadata missing for input {0}")]
    MissingConfirmationMetadata(usize),
    #[error("block exceeds maximum weight")]
    OversizeBlockWeight,
    #[error("block exceeds maximum sigop cost")]
    ExcessiveSigopCost,
    #[error("block transaction count admits a malleated Merkle root")]
    MalleatedMerkleTree,
    #[error("BIP34 coinbase height push does not match block height")]
    Bip34HeightMismatch,
    #[error("duplicate coinbase rejected under BIP30")]
    DuplicateCoinbase,

    // ---- Indexing / argument errors (not part of the §7 taxonomy proper,
    // but needed to reject malformed caller input the same way the teacher's
    // `InvalidInputIndex`/`InvalidPrevoutsCount` do) ------------------------
    #[error("input index {0} out of range")]
    InvalidInputIndex(usize),
    #[error("expected {1} prevouts, got {0}")]
    InvalidPrevoutsCount(usize, usize),
    #[error("invalid sighash type byte {0:#x}")]
    InvalidSighashType(u8),
}
