use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;

use microfin_auth::catalog::{LOANS_READ, PRODUCTS_WRITE};
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;
use microfin_lending::{DefineProduct, LoanProduct, ProductCommand, ProductId, RetireProduct};

use crate::app::errors::{ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(define_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/retire", post(retire_product))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    product_id: ProductId,
    cmd: ProductCommand,
    status: StatusCode,
) -> ApiResult {
    let cmd = CmdAuth::new(cmd, PRODUCTS_WRITE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    let committed = services
        .dispatch::<LoanProduct>(tenant.tenant_id(), product_id.0, aggregate_types::LOAN_PRODUCT, cmd.inner, |_, id| {
            LoanProduct::empty(ProductId::new(id))
        })
        .map_err(dispatch_error_to_response)?;

    Ok(common::committed(status, product_id, &committed))
}

pub async fn define_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::DefineProductRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let product_id = ProductId::new(AggregateId::new());

    let cmd = ProductCommand::Define(DefineProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        name: body.name,
        interest_method: body.interest_method,
        annual_rate: body.annual_rate,
        frequency: body.frequency,
        min_principal: body.min_principal,
        max_principal: body.max_principal,
        min_term: body.min_term,
        max_term: body.max_term,
        processing_fee: body.processing_fee,
        penalty_rate: body.penalty_rate,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, product_id, cmd, StatusCode::CREATED)
}

pub async fn retire_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let product_id = ProductId::new(common::parse_id(&id, "product")?);

    let cmd = ProductCommand::Retire(RetireProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, product_id, cmd, StatusCode::OK)
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LOANS_READ)?;
    let product_id = ProductId::new(common::parse_id(&id, "product")?);

    services
        .read_models()
        .products
        .get(tenant.tenant_id(), &product_id)
        .map(common::ok)
        .ok_or_else(|| not_found("product"))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LOANS_READ)?;
    Ok(common::items(services.read_models().products.list(tenant.tenant_id())))
}
