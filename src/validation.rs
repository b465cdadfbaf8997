//! Validation pipeline (C8) — Orange Paper Section 4.8
//!
//! Four ordered stages a transaction passes through on its way into a
//! block: `check` (structure, absolute locktime, BIP34 coinbase height),
//! `accept` (sigop budget and overspend, needs prevouts), `connect`
//! (script execution against prevouts), `confirm` (BIP68 relative locks,
//! maturity, confirmation-state rules). Each stage only checks what the
//! previous ones didn't.

use crate::chain::context::Context;
use crate::chain::context::Flags;
use crate::chain::transaction::Transaction;
use crate::constants::MAX_SCRIPT_SIGOPS;
use crate::error::{ConsensusError, Result};
use crate::program;

/// Stage 1: context-free structural checks plus the context-dependent
/// checks the Orange Paper assigns to `check(ctx)` regardless: absolute
/// locktime and, for a coinbase, the BIP34 height push.
pub fn check(tx: &Transaction, ctx: &Context) -> Result<()> {
    tx.check()?;
    if !tx.locktime_satisfied(ctx.height, ctx.locktime_reference_time()) {
        return Err(ConsensusError::AbsoluteLockUnsatisfied);
    }
    if ctx.flags.contains(Flags::BIP34) && tx.is_coinbase() {
        tx.check_bip34_height(ctx.height)?;
    }
    Ok(())
}

/// Stage 2: prevout-dependent but confirmation-independent checks — the
/// sigop-budget guard and the overspend check (sum(inputs) ≥ sum(outputs)).
pub fn accept(tx: &Transaction, ctx: &Context) -> Result<()> {
    guard_accept(tx, ctx)?;
    if !tx.is_coinbase() {
        check_not_overspent(tx)?;
    }
    Ok(())
}

/// Sum of prevout values must be at least the sum of output values; a
/// coinbase is exempt (it has no prevouts to sum).
fn check_not_overspent(tx: &Transaction) -> Result<()> {
    let mut input_total: u64 = 0;
    for (i, input) in tx.inputs().iter().enumerate() {
        let prevout = input.prevout.as_ref().ok_or(ConsensusError::MissingPrevout(i))?;
        input_total = input_total.checked_add(prevout.value).ok_or(ConsensusError::Overspent)?;
    }
    let output_total: u64 = tx.outputs().iter().map(|output| output.value).sum();
    if input_total < output_total {
        return Err(ConsensusError::Overspent);
    }
    Ok(())
}

fn relative_lock_satisfied(sequence: u32, confirmation: &crate::chain::input::Confirmation, ctx: &Context) -> bool {
    use crate::constants::{SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG};
    let value = sequence & SEQUENCE_LOCKTIME_MASK;
    if sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
        let required_time = confirmation.median_time_past + (value as u32) * 512;
        ctx.median_time_past >= required_time
    } else {
        let required_height = confirmation.height + value;
        ctx.height >= required_height
    }
}

/// Stage 3: execute every input's script against its prevout (Orange
/// Paper Section 4.8 `connect(ctx)`).
pub fn connect(tx: &Transaction, ctx: &Context) -> Result<()> {
    for input_index in 0..tx.inputs().len() {
        program::connect(tx, input_index, ctx.flags)?;
    }
    Ok(())
}

/// Cheap pre-check: total legacy-style sigop count (`is_counted` is not
/// quite it; this approximates the per-transaction sigop budget guard a
/// mempool/block-builder runs before the expensive `connect` pass).
fn guard_accept(tx: &Transaction, _ctx: &Context) -> Result<()> {
    let mut sigops = 0usize;
    for input in tx.inputs() {
        for op in input.script.operations() {
            if matches!(
                op.code,
                crate::chain::script::opcode::CHECKSIG
                    | crate::chain::script::opcode::CHECKSIGVERIFY
                    | crate::chain::script::opcode::CHECKMULTISIG
                    | crate::chain::script::opcode::CHECKMULTISIGVERIFY
            ) {
                sigops += 1;
            }
        }
    }
    if sigops > MAX_SCRIPT_SIGOPS {
        return Err(ConsensusError::SigOpCountExceeded);
    }
    Ok(())
}

/// Stage 4: confirmation-state rules — BIP68 relative locks, coinbase
/// maturity, and double-spend against already-confirmed outputs (Orange
/// Paper Section 4.8 `confirm(ctx)`).
pub fn confirm(tx: &Transaction, ctx: &Context) -> Result<()> {
    let check_relative_lock = ctx.flags.contains(Flags::BIP68) && tx.version() >= 2 && !tx.is_coinbase();
    for (i, input) in tx.inputs().iter().enumerate() {
        let confirmation = input.confirmation.as_ref().ok_or(ConsensusError::MissingConfirmationMetadata(i))?;
        if confirmation.spent {
            return Err(ConsensusError::ConfirmedDoubleSpend);
        }
        if confirmation.coinbase {
            let maturity_height = confirmation.height as u64 + crate::constants::COINBASE_MATURITY;
            if (ctx.height as u64) < maturity_height {
                return Err(ConsensusError::CoinbaseNotMature);
            }
        }
        if check_relative_lock && !input.relative_lock_disabled() && !relative_lock_satisfied(input.sequence, confirmation, ctx) {
            return Err(ConsensusError::RelativeLockUnsatisfied);
        }
    }
    Ok(())
}

/// Run every stage in order, short-circuiting on the first failure —
/// the full admission pipeline for a transaction being connected to a
/// specific chain tip.
pub fn validate(tx: &Transaction, ctx: &Context) -> Result<()> {
    check(tx, ctx)?;
    accept(tx, ctx)?;
    connect(tx, ctx)?;
    confirm(tx, ctx)?;
    Ok(())
}
