use axum::{Router, middleware::from_fn_with_state, routing::get};

use microfin_tenancy::Entitlement;

pub mod borrowers;
pub mod common;
pub mod disbursements;
pub mod ledger;
pub mod loans;
pub mod payroll;
pub mod products;
pub mod rbac;
pub mod savings;
pub mod system;
pub mod tenancy;

/// Gate every route of `router` behind a tenant entitlement.
fn entitled(router: Router, entitlement: Entitlement) -> Router {
    router.route_layer(from_fn_with_state(entitlement, common::entitlement_gate))
}

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(entitled(Router::new().route("/stream", get(system::stream)), Entitlement::Realtime))
        .nest("/borrowers", borrowers::router())
        .nest("/products", entitled(products::router(), Entitlement::Loans))
        .nest("/loans", entitled(loans::router(), Entitlement::Loans))
        .nest("/disbursements", entitled(disbursements::router(), Entitlement::DisbursementBatches))
        .nest("/savings", entitled(savings::router(), Entitlement::Savings))
        .nest("/ledger", entitled(ledger::router(), Entitlement::Accounting))
        .nest("/payroll", entitled(payroll::router(), Entitlement::Payroll))
        .nest("/tenancy", tenancy::router())
        .nest("/rbac", rbac::router())
}
