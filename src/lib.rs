//! Bitcoin chain and script consensus core.
//!
//! The canonical data model (transactions, blocks, scripts), the
//! consensus-critical wire codec, the script interpreter, and the
//! signature-hash engine that together decide whether a transaction may
//! spend a given output. Deliberately excludes P2P networking, wallet key
//! derivation, storage, and chain-selection/difficulty policy — those sit
//! above this crate and consume it.

pub mod chain;
pub mod codec;
pub mod constants;
pub mod ecc;
pub mod error;
pub mod hash;
pub mod interpreter;
pub mod program;
pub mod sighash;
pub mod validation;

pub use error::{ConsensusError, Result};
