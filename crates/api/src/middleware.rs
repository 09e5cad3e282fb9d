use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use microfin_auth::{JwtClaims, JwtValidator};
use microfin_core::{BranchId, TenantId};

use crate::app::errors::fail;
use crate::context::{PrincipalContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const BRANCH_HEADER: &str = "x-branch-id";

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Ways a request can fail to establish its context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("missing or malformed bearer token")]
    MissingBearer,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("x-tenant-id is not a valid id")]
    InvalidTenantHeader,
    #[error("x-tenant-id does not match the token tenant")]
    TenantMismatch,
    #[error("x-branch-id is not a valid id")]
    InvalidBranchHeader,
    #[error("x-branch-id is outside the token's branch scope")]
    BranchMismatch,
}

impl ContextError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            ContextError::MissingBearer | ContextError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ContextError::InvalidTenantHeader => (StatusCode::BAD_REQUEST, "invalid_tenant_header"),
            ContextError::TenantMismatch => (StatusCode::FORBIDDEN, "tenant_mismatch"),
            ContextError::InvalidBranchHeader => (StatusCode::BAD_REQUEST, "invalid_branch_header"),
            ContextError::BranchMismatch => (StatusCode::FORBIDDEN, "branch_mismatch"),
        };
        fail(status, code, self.to_string())
    }
}

pub async fn auth_middleware(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    let (tenant, principal) = match resolve_context(state.jwt.as_ref(), req.headers()) {
        Ok(ctx) => ctx,
        Err(err) => {
            debug!(error = %err, "request rejected before routing");
            return err.into_response();
        }
    };

    req.extensions_mut().insert(tenant);
    req.extensions_mut().insert(principal);

    next.run(req).await
}

fn resolve_context(
    jwt: &dyn JwtValidator,
    headers: &HeaderMap,
) -> Result<(TenantContext, PrincipalContext), ContextError> {
    let token = extract_bearer(headers)?;
    let claims = jwt
        .validate(token, Utc::now())
        .map_err(|e| ContextError::InvalidToken(e.to_string()))?;

    let tenant = tenant_context(&claims, headers)?;
    Ok((tenant, PrincipalContext::new(claims.sub, claims.roles)))
}

fn tenant_context(claims: &JwtClaims, headers: &HeaderMap) -> Result<TenantContext, ContextError> {
    if let Some(raw) = header_str(headers, TENANT_HEADER) {
        let header_tenant: TenantId = raw
            .ok_or(ContextError::InvalidTenantHeader)?
            .parse()
            .map_err(|_| ContextError::InvalidTenantHeader)?;
        if header_tenant != claims.tenant_id {
            return Err(ContextError::TenantMismatch);
        }
    }

    let header_branch = match header_str(headers, BRANCH_HEADER) {
        Some(raw) => Some(
            raw.ok_or(ContextError::InvalidBranchHeader)?
                .parse::<BranchId>()
                .map_err(|_| ContextError::InvalidBranchHeader)?,
        ),
        None => None,
    };

    let branch_id = match (claims.branch_id, header_branch) {
        (Some(scope), Some(requested)) if scope != requested => return Err(ContextError::BranchMismatch),
        (scope, requested) => requested.or(scope),
    };

    Ok(TenantContext::new(claims.tenant_id, branch_id))
}

/// `None` when absent, `Some(None)` when present but not visible ASCII.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<Option<&'a str>> {
    headers.get(name).map(|v| v.to_str().ok().map(str::trim))
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ContextError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(ContextError::MissingBearer)?
        .to_str()
        .map_err(|_| ContextError::MissingBearer)?;

    let token = header.strip_prefix("Bearer ").ok_or(ContextError::MissingBearer)?.trim();
    if token.is_empty() {
        return Err(ContextError::MissingBearer);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;
    use microfin_auth::{Hs256JwtValidator, PrincipalId, Role};

    fn claims(branch_id: Option<BranchId>) -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: PrincipalId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::new("cashier")],
            branch_id,
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::minutes(5),
        }
    }

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn bearer_is_required() {
        let jwt = Hs256JwtValidator::new("s");
        assert_eq!(resolve_context(&jwt, &HeaderMap::new()).unwrap_err(), ContextError::MissingBearer);
        let h = headers(&[("authorization", "Basic abc".into())]);
        assert_eq!(resolve_context(&jwt, &h).unwrap_err(), ContextError::MissingBearer);
        let h = headers(&[("authorization", "Bearer  ".into())]);
        assert_eq!(resolve_context(&jwt, &h).unwrap_err(), ContextError::MissingBearer);
    }

    #[test]
    fn token_tenant_wins_and_header_must_agree() {
        let jwt = Hs256JwtValidator::new("s");
        let c = claims(None);
        let token = format!("Bearer {}", jwt.sign(&c).unwrap());

        let (tenant, principal) = resolve_context(&jwt, &headers(&[("authorization", token.clone())])).unwrap();
        assert_eq!(tenant.tenant_id(), c.tenant_id);
        assert_eq!(principal.principal_id(), c.sub);

        let same = headers(&[("authorization", token.clone()), (TENANT_HEADER, c.tenant_id.to_string())]);
        assert!(resolve_context(&jwt, &same).is_ok());

        let other = headers(&[("authorization", token.clone()), (TENANT_HEADER, TenantId::new().to_string())]);
        assert_eq!(resolve_context(&jwt, &other).unwrap_err(), ContextError::TenantMismatch);

        let junk = headers(&[("authorization", token), (TENANT_HEADER, "not-a-uuid".into())]);
        assert_eq!(resolve_context(&jwt, &junk).unwrap_err(), ContextError::InvalidTenantHeader);
    }

    #[test]
    fn branch_scope_is_enforced() {
        let scope = BranchId::new();
        let c = claims(Some(scope));

        assert_eq!(tenant_context(&c, &HeaderMap::new()).unwrap().branch_id(), Some(scope));
        let same = headers(&[(BRANCH_HEADER, scope.to_string())]);
        assert_eq!(tenant_context(&c, &same).unwrap().branch_id(), Some(scope));
        let other = headers(&[(BRANCH_HEADER, BranchId::new().to_string())]);
        assert_eq!(tenant_context(&c, &other).unwrap_err(), ContextError::BranchMismatch);
        let junk = headers(&[(BRANCH_HEADER, "x".into())]);
        assert_eq!(tenant_context(&c, &junk).unwrap_err(), ContextError::InvalidBranchHeader);
    }

    #[test]
    fn unscoped_tokens_may_pick_any_branch() {
        let c = claims(None);
        let branch = BranchId::new();
        let h = headers(&[(BRANCH_HEADER, branch.to_string())]);
        assert_eq!(tenant_context(&c, &h).unwrap().branch_id(), Some(branch));
        assert_eq!(tenant_context(&c, &HeaderMap::new()).unwrap().branch_id(), None);
    }
}
