//! Fork/flags model (C9) — Orange Paper Section 3 / 4.9
//!
//! `Forks` is the caller-configured set of activated BIPs; `Flags` is the
//! per-validation-call reduction the rest of this crate actually reads.
//! Activation (by height or median-time-past) is chain-state-derived
//! upstream of this core; the mapping from `Forks` to `Flags` is total and
//! does not itself look at height — the caller already resolved that when
//! it decided which booleans in `Forks` to set for this block.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        const BIP16  = 1 << 0;
        const BIP30  = 1 << 1;
        const BIP30_DEACTIVATE = 1 << 2;
        const BIP30_REACTIVATE = 1 << 3;
        const BIP34  = 1 << 4;
        const BIP42  = 1 << 5;
        const BIP65  = 1 << 6;
        const BIP66  = 1 << 7;
        const BIP68  = 1 << 8;
        const BIP90  = 1 << 9;
        const BIP112 = 1 << 10;
        const BIP113 = 1 << 11;
        const BIP141 = 1 << 12;
        const BIP143 = 1 << 13;
        const BIP147 = 1 << 14;
        const BIP341 = 1 << 15;
        const BIP342 = 1 << 16;
    }
}

/// Caller-configured per-BIP activation booleans, reduced to a `Flags`
/// bitset by `reduce`. Kept as a plain struct (not the bitset itself) so
/// call sites read as named booleans rather than bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Forks {
    pub bip16: bool,
    pub bip30: bool,
    pub bip30_deactivate: bool,
    pub bip30_reactivate: bool,
    pub bip34: bool,
    pub bip42: bool,
    pub bip65: bool,
    pub bip66: bool,
    pub bip68: bool,
    pub bip90: bool,
    pub bip112: bool,
    pub bip113: bool,
    pub bip141: bool,
    pub bip143: bool,
    pub bip147: bool,
    pub bip341: bool,
    pub bip342: bool,
}

impl Forks {
    /// All rules active — the common case for validating recent mainnet
    /// history end to end.
    pub fn all() -> Self {
        Forks {
            bip16: true,
            bip30: true,
            bip30_deactivate: true,
            bip30_reactivate: true,
            bip34: true,
            bip42: true,
            bip65: true,
            bip66: true,
            bip68: true,
            bip90: true,
            bip112: true,
            bip113: true,
            bip141: true,
            bip143: true,
            bip147: true,
            bip341: true,
            bip342: true,
        }
    }

    pub fn reduce(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::BIP16, self.bip16);
        flags.set(Flags::BIP30, self.bip30);
        flags.set(Flags::BIP30_DEACTIVATE, self.bip30_deactivate);
        flags.set(Flags::BIP30_REACTIVATE, self.bip30_reactivate);
        flags.set(Flags::BIP34, self.bip34);
        flags.set(Flags::BIP42, self.bip42);
        flags.set(Flags::BIP65, self.bip65);
        flags.set(Flags::BIP66, self.bip66);
        flags.set(Flags::BIP68, self.bip68);
        flags.set(Flags::BIP90, self.bip90);
        flags.set(Flags::BIP112, self.bip112);
        flags.set(Flags::BIP113, self.bip113);
        flags.set(Flags::BIP141, self.bip141);
        flags.set(Flags::BIP143, self.bip143);
        flags.set(Flags::BIP147, self.bip147);
        flags.set(Flags::BIP341, self.bip341);
        flags.set(Flags::BIP342, self.bip342);
        flags
    }
}

/// Height/time/flags triple a validation call is parameterized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub height: u32,
    pub median_time_past: u32,
    pub timestamp: u32,
    pub flags: Flags,
}

impl Context {
    pub fn new(height: u32, median_time_past: u32, timestamp: u32, forks: Forks) -> Self {
        Context { height, median_time_past, timestamp, flags: forks.reduce() }
    }

    /// Locktime reference time: median-time-past under BIP113, else the
    /// block timestamp.
    pub fn locktime_reference_time(&self) -> u32 {
        if self.flags.contains(Flags::BIP113) {
            self.median_time_past
        } else {
            self.timestamp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_maps_each_bit() {
        let forks = Forks { bip141: true, bip342: true, ..Forks::default() };
        let flags = forks.reduce();
        assert!(flags.contains(Flags::BIP141));
        assert!(flags.contains(Flags::BIP342));
        assert!(!flags.contains(Flags::BIP16));
    }

    #[test]
    fn test_all_sets_every_flag() {
        let flags = Forks::all().reduce();
        assert!(flags.contains(Flags::all()));
    }

    #[test]
    fn test_locktime_reference_time_bip113() {
        let ctx = Context::new(100, 500, 600, Forks { bip113: true, ..Forks::default() });
        assert_eq!(ctx.locktime_reference_time(), 500);
        let ctx2 = Context::new(100, 500, 600, Forks::default());
        assert_eq!(ctx2.locktime_reference_time(), 600);
    }
}
