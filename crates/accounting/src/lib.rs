//! Accounting module (double-entry ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod chart;
pub mod ledger;
pub mod posting;

pub use chart::{Account, AccountKind, chart_of_accounts, lookup_account};
pub use ledger::{
    JournalEntryLine, JournalEntryPosted, JournalEntryReversed, Ledger, LedgerCommand, LedgerEvent,
    PostJournalEntry, ReverseJournalEntry, ledger_aggregate_id, validate_lines,
};
pub use posting::RepaymentParts;
