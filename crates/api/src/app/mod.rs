//! HTTP application wiring.
//!
//! - `services.rs`: event store/bus, dispatcher, projections, realtime channel
//! - `routes/`: handlers, one file per domain area
//! - `dto.rs`: request bodies
//! - `errors.rs`: error body and status mapping

use std::sync::Arc;

use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};
use tower::ServiceBuilder;
use tracing::info;

use microfin_auth::Hs256JwtValidator;

use crate::config::AppConfig;
use crate::middleware::{self, AuthState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let auth_state = AuthState { jwt: Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes())) };
    let services = Arc::new(services::build_services(config).await?);

    info!(
        persistent = config.use_persistent_stores,
        default_plan = %config.default_plan,
        "application services ready"
    );

    // Everything but /health needs a bearer token and a tenant context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(from_fn_with_state(auth_state, middleware::auth_middleware));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new()))
}
