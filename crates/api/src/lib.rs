//! HTTP API: configuration, request context, routing and service wiring.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
