//! Process configuration read from the environment.

use std::net::SocketAddr;

use anyhow::{Context, bail};
use tracing::warn;

use microfin_tenancy::Plan;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Plan assumed for tenants that never registered a subscription.
    pub default_plan: Plan,
    pub realtime_buffer: usize,
}

impl AppConfig {
    /// In-memory configuration with defaults (tests, local runs).
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            default_plan: Plan::Enterprise,
            realtime_buffer: 256,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let mut config = Self::in_memory(jwt_secret);

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr.parse().with_context(|| format!("invalid BIND_ADDR {addr:?}"))?;
        }
        if let Some(flag) = get("USE_PERSISTENT_STORES") {
            config.use_persistent_stores =
                flag.parse().with_context(|| format!("USE_PERSISTENT_STORES must be true or false, got {flag:?}"))?;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(plan) = get("DEFAULT_PLAN") {
            config.default_plan = plan.parse().context("invalid DEFAULT_PLAN")?;
        }
        if let Some(buffer) = get("REALTIME_BUFFER") {
            config.realtime_buffer =
                buffer.parse().with_context(|| format!("invalid REALTIME_BUFFER {buffer:?}"))?;
            if config.realtime_buffer == 0 {
                bail!("REALTIME_BUFFER must be greater than zero");
            }
        }

        if config.use_persistent_stores && config.database_url.is_none() {
            bail!("USE_PERSISTENT_STORES=true requires DATABASE_URL");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let c = config(&[]).unwrap();
        assert_eq!(c.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(c.bind_addr.port(), 8080);
        assert!(!c.use_persistent_stores);
        assert_eq!(c.default_plan, Plan::Enterprise);
        assert_eq!(c.realtime_buffer, 256);
    }

    #[test]
    fn values_are_parsed() {
        let c = config(&[
            ("JWT_SECRET", "s3cret"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DEFAULT_PLAN", "starter"),
            ("REALTIME_BUFFER", "32"),
        ])
        .unwrap();
        assert_eq!(c.jwt_secret, "s3cret");
        assert_eq!(c.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(c.default_plan, Plan::Starter);
        assert_eq!(c.realtime_buffer, 32);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(config(&[("DEFAULT_PLAN", "platinum")]).is_err());
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(config(&[("REALTIME_BUFFER", "0")]).is_err());
        assert!(config(&[("USE_PERSISTENT_STORES", "yes")]).is_err());
    }

    #[test]
    fn persistent_mode_needs_a_database() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        assert!(config(&[("USE_PERSISTENT_STORES", "true"), ("DATABASE_URL", "postgres://x")]).is_ok());
    }
}
