//! Savings accounts (event-sourced).

pub mod account;

pub use account::{
    AccountClosed, AccountOpened, CloseAccount, Deposit, OpenAccount, SavingsAccount, SavingsAccountId, SavingsCommand,
    SavingsEvent, SavingsStatus, SavingsTransaction, TransactionKind, TransactionPosted, TransactionReversed,
    ReverseTransaction, Withdraw,
};
