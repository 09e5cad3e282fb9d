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

use microfin_accounting::{
    JournalEntryLine, Ledger, LedgerCommand, PostJournalEntry, ReverseJournalEntry, chart_of_accounts,
    ledger_aggregate_id, lookup_account,
};
use microfin_auth::catalog::{LEDGER_POST, LEDGER_READ};
use microfin_infra::aggregate_types;
use microfin_infra::event_store::StoredEvent;

use crate::app::errors::{ApiResult, dispatch_error_to_response, fail, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/balances", get(list_balances))
        .route("/balances/:code", get(get_balance))
        .route("/trial-balance", get(trial_balance))
        .route("/journal", get(list_journal).post(post_entry))
        .route("/journal/:id", get(get_entry))
        .route("/journal/:id/reverse", post(reverse_entry))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    cmd: LedgerCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd = CmdAuth::new(cmd, LEDGER_POST);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<Ledger>(tenant.tenant_id(), ledger_aggregate_id(), aggregate_types::LEDGER, cmd.inner, |_, id| {
            Ledger::empty(id)
        })
        .map_err(dispatch_error_to_response)
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;
    Ok(common::items(chart_of_accounts()))
}

/// Manual journal entry. Lines name accounts by chart code.
pub async fn post_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::PostJournalEntryRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in body.lines {
        let Some(account) = lookup_account(&line.account) else {
            return Err(fail(
                StatusCode::BAD_REQUEST,
                "unknown_account",
                format!("no account with code {}", line.account),
            ));
        };
        lines.push(JournalEntryLine { account, debit: line.debit, credit: line.credit });
    }

    let entry_id = Uuid::now_v7();
    let cmd = LedgerCommand::Post(PostJournalEntry {
        tenant_id: tenant.tenant_id(),
        entry_id,
        reference: body.reference,
        memo: body.memo,
        lines,
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, cmd)?;
    Ok(common::committed(StatusCode::CREATED, entry_id, &committed))
}

pub async fn reverse_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let entry_id: Uuid = common::parse_id(&id, "journal entry")?;
    let body = common::body(body)?;

    let reversal_id = Uuid::now_v7();
    let cmd = LedgerCommand::Reverse(ReverseJournalEntry {
        tenant_id: tenant.tenant_id(),
        entry_id,
        reversal_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, cmd)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": entry_id,
            "reversal_id": reversal_id,
            "events_committed": committed.len(),
        })),
    )
        .into_response())
}

pub async fn list_balances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;
    Ok(common::items(services.read_models().ledger.balances(tenant.tenant_id())))
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(code): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;

    services
        .read_models()
        .ledger
        .balance(tenant.tenant_id(), &code)
        .map(common::ok)
        .ok_or_else(|| not_found("account"))
}

pub async fn trial_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;
    Ok(common::ok(services.read_models().ledger.trial_balance(tenant.tenant_id())))
}

pub async fn list_journal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;
    Ok(common::items(services.read_models().ledger.journal(tenant.tenant_id())))
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LEDGER_READ)?;
    let entry_id: Uuid = common::parse_id(&id, "journal entry")?;

    services
        .read_models()
        .ledger
        .entry(tenant.tenant_id(), entry_id)
        .map(common::ok)
        .ok_or_else(|| not_found("journal entry"))
}
