//! Request bodies. Responses serialize the read models directly.
//!
//! Amounts are integer minor units; rates are basis points.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use microfin_borrowers::ContactDetails;
use microfin_core::{BranchId, Money, Rate};
use microfin_lending::{InterestMethod, RepaymentFrequency};
use microfin_payroll::Deduction;
use microfin_tenancy::{Entitlement, Plan};

// -------------------------
// Borrowers
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterBorrowerRequest {
    pub name: String,
    pub national_id: String,
    #[serde(default)]
    pub contact: ContactDetails,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBorrowerRequest {
    pub name: Option<String>,
    pub contact: Option<ContactDetails>,
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub reason: Option<String>,
}

// -------------------------
// Lending
// -------------------------

#[derive(Debug, Deserialize)]
pub struct DefineProductRequest {
    pub name: String,
    pub interest_method: InterestMethod,
    pub annual_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub min_principal: Money,
    pub max_principal: Money,
    pub min_term: u32,
    pub max_term: u32,
    #[serde(default)]
    pub processing_fee: Rate,
    #[serde(default)]
    pub penalty_rate: Rate,
}

#[derive(Debug, Deserialize)]
pub struct ApplyForLoanRequest {
    pub borrower_id: String,
    pub product_id: String,
    pub principal: Money,
    pub term: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisburseLoanRequest {
    pub first_due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RecordRepaymentRequest {
    /// Client-chosen id makes retries safe; generated when absent.
    pub payment_id: Option<Uuid>,
    pub amount: Money,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AssessPenaltyRequest {
    /// Defaults to the product penalty rate applied to current arrears.
    pub amount: Option<Money>,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkDelinquentRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BatchItemRequest {
    pub loan_id: String,
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub reference: String,
    pub items: Vec<BatchItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct MarkBatchSentRequest {
    pub provider_reference: String,
}

// -------------------------
// Savings
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub owner: String,
    #[serde(default)]
    pub minimum_balance: Money,
}

#[derive(Debug, Deserialize)]
pub struct SavingsTransactionRequest {
    pub txn_id: Option<Uuid>,
    pub amount: Money,
}

// -------------------------
// Ledger
// -------------------------

#[derive(Debug, Deserialize)]
pub struct JournalLineRequest {
    /// Chart of accounts code, e.g. "1000".
    pub account: String,
    #[serde(default)]
    pub debit: Money,
    #[serde(default)]
    pub credit: Money,
}

#[derive(Debug, Deserialize)]
pub struct PostJournalEntryRequest {
    pub reference: String,
    pub memo: Option<String>,
    pub lines: Vec<JournalLineRequest>,
}

// -------------------------
// Payroll
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePayrollRunRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AddPayslipRequest {
    pub employee: String,
    pub gross: Money,
    #[serde(default)]
    pub deductions: Vec<Deduction>,
}

// -------------------------
// Tenancy
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterTenantRequest {
    pub name: String,
    pub plan: Plan,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: Plan,
}

#[derive(Debug, Deserialize)]
pub struct EntitlementRequest {
    pub entitlement: Entitlement,
}

#[derive(Debug, Deserialize)]
pub struct IssueChargeRequest {
    /// Billing period label, e.g. "2026-10".
    pub period: String,
}

// -------------------------
// RBAC
// -------------------------

#[derive(Debug, Deserialize)]
pub struct DefineRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub permission: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// Defaults to a fresh id; pass the token subject to register an existing principal.
    pub user_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
    pub home_branch: Option<BranchId>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub permission: String,
    /// Explain for another user of the tenant instead of the caller.
    pub user_id: Option<String>,
}
