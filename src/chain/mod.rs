//! Chain data model (C4) — Orange Paper Section 3 / 4.4

pub mod block;
pub mod context;
pub mod input;
pub mod output;
pub mod point;
pub mod script;
pub mod transaction;
pub mod witness;

pub use block::{Block, Header};
pub use context::{Context, Flags, Forks};
pub use input::{Confirmation, Input, Prevout};
pub use output::Output;
pub use point::Outpoint;
pub use script::{Operation, Script};
pub use transaction::Transaction;
pub use witness::Witness;
