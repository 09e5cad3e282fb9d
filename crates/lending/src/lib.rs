//! Lending: loan products, amortization, repayment allocation, the loan
//! lifecycle and disbursement batches.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod allocation;
pub mod disbursement;
pub mod loan;
pub mod product;
pub mod schedule;

pub use allocation::{Allocation, Outstanding, allocate};
pub use disbursement::{
    BatchCommand, BatchCreated, BatchEvent, BatchFailed, BatchId, BatchItem, BatchPosted, BatchRequeued, BatchSent,
    BatchStatus, CreateBatch, DisbursementBatch, MarkBatchFailed, MarkBatchPosted, MarkBatchSent, RequeueBatch,
};
pub use loan::{
    ApplyForLoan, ApproveLoan, AssessPenalty, CloseLoan, ClosureReason, DelinquencyCured, DisburseLoan, Loan,
    LoanApplied, LoanApproved, LoanClosed, LoanCommand, LoanDisbursed, LoanEvent, LoanId, LoanMarkedDelinquent,
    LoanPayment, LoanRejected, LoanReopened, LoanStatus, LoanTerms, LoanWrittenOff, MarkDelinquent, PenaltyAssessed,
    RecordRepayment, RejectLoan, RepaymentRecorded, RepaymentReversed, ReverseRepayment, WriteOffLoan,
};
pub use product::{
    DefineProduct, LoanProduct, ProductCommand, ProductDefined, ProductEvent, ProductId, ProductRetired,
    ProductSnapshot, RetireProduct,
};
pub use schedule::{Installment, InterestMethod, RepaymentFrequency, ScheduleTerms, generate_schedule};
