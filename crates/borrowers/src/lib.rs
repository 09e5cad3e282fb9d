//! Borrower registry (event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod borrower;

pub use borrower::{
    Borrower, BorrowerCommand, BorrowerEvent, BorrowerId, BorrowerReactivated, BorrowerRegistered, BorrowerStatus,
    BorrowerSuspended, BorrowerUpdated, ContactDetails, ReactivateBorrower, RegisterBorrower, SuspendBorrower,
    UpdateBorrowerDetails,
};
