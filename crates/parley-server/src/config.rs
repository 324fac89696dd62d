//! Server configuration loaded from environment variables.
//!
//! Everything except the JWT secret has a default suitable for local use.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `PARLEY_HOST`, default `0.0.0.0`
    pub host: String,

    /// Env: `PARLEY_PORT`, default `3000`
    pub port: u16,

    /// Env: `PARLEY_DB_PATH`, default `parley.db`
    pub db_path: PathBuf,

    /// Env: `PARLEY_JWT_SECRET`. Required.
    pub jwt_secret: String,

    /// Env: `PARLEY_TOKEN_TTL_HOURS`, default `720`
    pub token_ttl_hours: i64,

    /// Seconds between background sweeps of expired pins; 0 disables.
    /// Env: `PARLEY_PIN_SWEEP_SECS`, default `300`
    pub pin_sweep_secs: u64,

    /// Env: `PARLEY_ADMIN_USERNAME` + `PARLEY_ADMIN_PASSWORD`
    pub admin: Option<(String, String)>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let port = match lookup("PARLEY_PORT") {
            Some(val) => val
                .parse()
                .with_context(|| format!("invalid PARLEY_PORT {:?}", val))?,
            None => 3000,
        };

        let token_ttl_hours = match lookup("PARLEY_TOKEN_TTL_HOURS") {
            Some(val) => match val.parse::<i64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PARLEY_TOKEN_TTL_HOURS, using default");
                    720
                }
            },
            None => 720,
        };

        let pin_sweep_secs = match lookup("PARLEY_PIN_SWEEP_SECS") {
            Some(val) => val.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(value = %val, "Invalid PARLEY_PIN_SWEEP_SECS, using default");
                300
            }),
            None => 300,
        };

        let admin = match (lookup("PARLEY_ADMIN_USERNAME"), lookup("PARLEY_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            (Some(_), _) | (_, Some(_)) => {
                tracing::warn!("PARLEY_ADMIN_USERNAME and PARLEY_ADMIN_PASSWORD must both be set; no admin seeded");
                None
            }
            _ => None,
        };

        Ok(Self {
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into())),
            jwt_secret,
            token_ttl_hours,
            pin_sweep_secs,
            admin,
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = load(&[("PARLEY_JWT_SECRET", "s3cr3t-value")]).unwrap();
        assert_eq!(config.bind_addr().unwrap(), ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.token_ttl_hours, 720);
        assert_eq!(config.pin_sweep_secs, 300);
        assert!(config.admin.is_none());
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(load(&[]).is_err());
        assert!(load(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PARLEY_JWT_SECRET", "s3cr3t-value"),
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "8088"),
            ("PARLEY_PIN_SWEEP_SECS", "0"),
            ("PARLEY_TOKEN_TTL_HOURS", "-4"),
            ("PARLEY_ADMIN_USERNAME", "root"),
            ("PARLEY_ADMIN_PASSWORD", "hunter2hunter2"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr().unwrap(), ([127, 0, 0, 1], 8088).into());
        assert_eq!(config.pin_sweep_secs, 0);
        assert_eq!(config.token_ttl_hours, 720);
        assert_eq!(config.admin, Some(("root".into(), "hunter2hunter2".into())));
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(load(&[("PARLEY_JWT_SECRET", "x1"), ("PARLEY_PORT", "http")]).is_err());
    }
}
