use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use microfin_auth::{CommandAuthorization, Permission};
use microfin_infra::event_store::StoredEvent;
use microfin_tenancy::Entitlement;

use crate::app::errors::{self, fail};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, permission: &'static str) -> Self {
        Self { inner, required: vec![Permission::from_static(permission)] }
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Authorize a read (no command attached).
pub fn require(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &'static str,
) -> Result<(), Response> {
    authz::authorize_command(services, tenant, principal, &CmdAuth::new((), permission))
}

/// Unwrap a JSON body, answering malformed input with the usual error body.
pub fn body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(v)| v)
        .map_err(|rejection| fail(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text()))
}

pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse().map_err(|_| errors::invalid_id(what))
}

/// `{"id": .., "events_committed": n}` for a successful command.
pub fn committed(status: StatusCode, id: impl ToString, events: &[StoredEvent]) -> Response {
    (status, Json(json!({ "id": id.to_string(), "events_committed": events.len() }))).into_response()
}

pub fn ok<T: serde::Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

pub fn items<T: serde::Serialize>(items: Vec<T>) -> Response {
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

/// Route layer: 403 `entitlement_required` unless the tenant may use `entitlement`.
///
/// Runs inside the auth middleware, so the tenant context is present.
pub async fn entitlement_gate(State(entitlement): State<Entitlement>, req: Request, next: Next) -> Response {
    let services = req.extensions().get::<Arc<AppServices>>().cloned();
    let tenant = req.extensions().get::<TenantContext>().copied();

    let (Some(services), Some(tenant)) = (services, tenant) else {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, "missing_context", "request context not initialised");
    };

    match authz::require_entitlement(&services, &tenant, entitlement) {
        Ok(()) => next.run(req).await,
        Err(denied) => denied,
    }
}
