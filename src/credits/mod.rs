//! Credit accounting.

/// Append-only credit ledger with refund compensation.
pub mod ledger;

pub use ledger::CreditLedger;
