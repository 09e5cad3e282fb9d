//! Payroll runs (event-sourced).

pub mod run;

pub use run::{
    AddPayslip, ApproveRun, CreateRun, Deduction, Payslip, PayslipAdded, PayrollCommand, PayrollEvent, PayrollRun,
    PayrollRunId, PostRun, RunApproved, RunCreated, RunPosted, RunStatus,
};
