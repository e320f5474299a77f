//! Credit ledger (append-only, per account).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Stores run
//! [`Account::post`] inside their own atomic read-modify-write.

pub mod account;
pub mod entry;

pub use account::{audit_history, Account, LedgerCommand, Plan, PostEntry};
pub use entry::{Direction, LedgerEntry};
