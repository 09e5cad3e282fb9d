//! Infrastructure layer: event storage, command dispatch, projections and
//! ledger posting of domain events.

pub mod command_dispatcher;
pub mod event_store;
pub mod postings;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;

/// Stream type tags written on every stored event.
pub mod aggregate_types {
    pub const BORROWER: &str = "borrowers.borrower";
    pub const LOAN_PRODUCT: &str = "lending.product";
    pub const LOAN: &str = "lending.loan";
    pub const DISBURSEMENT_BATCH: &str = "lending.disbursement_batch";
    pub const SAVINGS_ACCOUNT: &str = "savings.account";
    pub const LEDGER: &str = "accounting.ledger";
    pub const PAYROLL_RUN: &str = "payroll.run";
    pub const TENANT: &str = "tenancy.tenant";
    pub const USER: &str = "auth.user";
    pub const ROLE: &str = "auth.role";
}
