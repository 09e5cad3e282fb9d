use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use microfin_auth::catalog::{SAVINGS_DEPOSIT, SAVINGS_OPEN, SAVINGS_READ, SAVINGS_REVERSE, SAVINGS_WITHDRAW};
use microfin_borrowers::{Borrower, BorrowerId};
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;
use microfin_infra::event_store::StoredEvent;
use microfin_savings::{
    CloseAccount, Deposit, OpenAccount, ReverseTransaction, SavingsAccount, SavingsAccountId, SavingsCommand, Withdraw,
};

use crate::app::errors::{ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_account).get(list_accounts))
        .route("/:id", get(get_account))
        .route("/:id/deposits", post(deposit))
        .route("/:id/withdrawals", post(withdraw))
        .route("/:id/transactions/:txn_id/reverse", post(reverse_transaction))
        .route("/:id/close", post(close_account))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    account_id: SavingsAccountId,
    cmd: SavingsCommand,
    permission: &'static str,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd = CmdAuth::new(cmd, permission);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<SavingsAccount>(
            tenant.tenant_id(),
            account_id.0,
            aggregate_types::SAVINGS_ACCOUNT,
            cmd.inner,
            |_, id| SavingsAccount::empty(SavingsAccountId::new(id)),
        )
        .map_err(dispatch_error_to_response)
}

fn account_id(raw: &str) -> Result<SavingsAccountId, Response> {
    Ok(SavingsAccountId::new(common::parse_id(raw, "savings account")?))
}

fn transaction_committed(account_id: SavingsAccountId, txn_id: Uuid, events: &[StoredEvent]) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({
            "id": account_id.to_string(),
            "txn_id": txn_id,
            "events_committed": events.len(),
        })),
    )
        .into_response()
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::OpenAccountRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let owner = BorrowerId::new(common::parse_id(&body.owner, "borrower")?);
    common::require(&services, &tenant, &principal, SAVINGS_OPEN)?;

    let borrower: Borrower = services
        .load(tenant.tenant_id(), owner.0, |_, id| Borrower::empty(BorrowerId::new(id)))
        .map_err(dispatch_error_to_response)?;
    if borrower.tenant_id().is_none() {
        return Err(not_found("borrower"));
    }

    let account_id = SavingsAccountId::new(AggregateId::new());
    let cmd = SavingsCommand::Open(OpenAccount {
        tenant_id: tenant.tenant_id(),
        account_id,
        owner,
        branch_id: tenant.branch_id().or(borrower.branch_id()),
        minimum_balance: body.minimum_balance,
        opened_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, account_id, cmd, SAVINGS_OPEN)?;
    Ok(common::committed(StatusCode::CREATED, account_id, &committed))
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::SavingsTransactionRequest>, JsonRejection>,
) -> ApiResult {
    let account_id = account_id(&id)?;
    let body = common::body(body)?;
    let txn_id = body.txn_id.unwrap_or_else(Uuid::now_v7);

    let cmd = SavingsCommand::Deposit(Deposit {
        tenant_id: tenant.tenant_id(),
        account_id,
        txn_id,
        amount: body.amount,
        by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, account_id, cmd, SAVINGS_DEPOSIT)?;
    Ok(transaction_committed(account_id, txn_id, &committed))
}

pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::SavingsTransactionRequest>, JsonRejection>,
) -> ApiResult {
    let account_id = account_id(&id)?;
    let body = common::body(body)?;
    let txn_id = body.txn_id.unwrap_or_else(Uuid::now_v7);

    let cmd = SavingsCommand::Withdraw(Withdraw {
        tenant_id: tenant.tenant_id(),
        account_id,
        txn_id,
        amount: body.amount,
        by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, account_id, cmd, SAVINGS_WITHDRAW)?;
    Ok(transaction_committed(account_id, txn_id, &committed))
}

pub async fn reverse_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, txn_id)): Path<(String, String)>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let account_id = account_id(&id)?;
    let txn_id: Uuid = common::parse_id(&txn_id, "transaction")?;
    let body = common::body(body)?;

    let cmd = SavingsCommand::Reverse(ReverseTransaction {
        tenant_id: tenant.tenant_id(),
        account_id,
        txn_id,
        reason: body.reason,
        by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, account_id, cmd, SAVINGS_REVERSE)?;
    Ok(common::committed(StatusCode::OK, account_id, &committed))
}

pub async fn close_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let account_id = account_id(&id)?;
    let cmd = SavingsCommand::Close(CloseAccount {
        tenant_id: tenant.tenant_id(),
        account_id,
        by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, account_id, cmd, SAVINGS_OPEN)?;
    Ok(common::committed(StatusCode::OK, account_id, &committed))
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, SAVINGS_READ)?;
    let account_id = account_id(&id)?;

    services
        .read_models()
        .savings
        .get(tenant.tenant_id(), &account_id)
        .map(common::ok)
        .ok_or_else(|| not_found("savings account"))
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, SAVINGS_READ)?;
    Ok(common::items(services.read_models().savings.list(tenant.tenant_id(), tenant.branch_id())))
}
