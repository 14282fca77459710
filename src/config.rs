use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub admin_api_key: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub session_ttl_secs: i64,
    pub session_cleanup_interval_secs: u64,
    pub resource_storage_path: PathBuf,
    pub max_resource_size_bytes: usize,
    pub resource_cleanup_interval_secs: u64,
    pub sse_keepalive_secs: u64,
    pub operation_history_size: usize,
    pub telemetry_retention_secs: i64,
    pub telemetry_prune_interval_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_ADMIN_API_KEY is required and must not be empty")]
    MissingAdminKey,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("{0} must be a valid non-negative integer")]
    InvalidNumber(&'static str),
    #[error("invalid bind address or port")]
    InvalidSocket,
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<T>().map_err(|_| ConfigError::InvalidNumber(name)))
        .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_api_key = env::var("MCP_ADMIN_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingAdminKey)?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let resource_storage_path = env::var("RESOURCE_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage"));

        let config = Self {
            admin_api_key,
            bind_addr,
            bind_port,
            session_ttl_secs: parse_env("SESSION_TTL_SECS")?.unwrap_or(3600),
            session_cleanup_interval_secs: parse_env("SESSION_CLEANUP_INTERVAL_SECS")?
                .unwrap_or(300),
            resource_storage_path,
            max_resource_size_bytes: parse_env("MAX_RESOURCE_SIZE_BYTES")?
                .unwrap_or(100 * 1024 * 1024),
            resource_cleanup_interval_secs: parse_env("RESOURCE_CLEANUP_INTERVAL_SECS")?
                .unwrap_or(300),
            sse_keepalive_secs: parse_env("SSE_KEEPALIVE_SECS")?.unwrap_or(15),
            operation_history_size: parse_env("OPERATION_HISTORY_SIZE")?.unwrap_or(1000),
            telemetry_retention_secs: parse_env("TELEMETRY_RETENTION_SECS")?.unwrap_or(3600),
            telemetry_prune_interval_secs: parse_env("TELEMETRY_PRUNE_INTERVAL_SECS")?
                .unwrap_or(300),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Env vars are process-global; serialize tests that touch them.
    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env guard")
    }

    fn clear_optional_vars() {
        for name in [
            "BIND_ADDR",
            "BIND_PORT",
            "SESSION_TTL_SECS",
            "SESSION_CLEANUP_INTERVAL_SECS",
            "RESOURCE_STORAGE_PATH",
            "MAX_RESOURCE_SIZE_BYTES",
            "RESOURCE_CLEANUP_INTERVAL_SECS",
            "SSE_KEEPALIVE_SECS",
            "OPERATION_HISTORY_SIZE",
            "TELEMETRY_RETENTION_SECS",
            "TELEMETRY_PRUNE_INTERVAL_SECS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn parse_defaults() {
        let _guard = env_guard();
        env::set_var("MCP_ADMIN_API_KEY", "admin-abc");
        clear_optional_vars();

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.max_resource_size_bytes, 100 * 1024 * 1024);
        assert_eq!(config.resource_storage_path, PathBuf::from("storage"));
    }

    #[test]
    fn missing_admin_key_fails() {
        let _guard = env_guard();
        env::remove_var("MCP_ADMIN_API_KEY");
        clear_optional_vars();

        let err = Config::from_env().expect_err("expected missing key error");
        assert!(matches!(err, ConfigError::MissingAdminKey));
    }

    #[test]
    fn invalid_port_fails() {
        let _guard = env_guard();
        env::set_var("MCP_ADMIN_API_KEY", "admin-abc");
        clear_optional_vars();
        env::set_var("BIND_PORT", "not-a-port");

        let err = Config::from_env().expect_err("expected invalid port error");
        assert!(matches!(err, ConfigError::InvalidPort));
        env::remove_var("BIND_PORT");
    }

    #[test]
    fn invalid_ttl_fails() {
        let _guard = env_guard();
        env::set_var("MCP_ADMIN_API_KEY", "admin-abc");
        clear_optional_vars();
        env::set_var("SESSION_TTL_SECS", "soon");

        let err = Config::from_env().expect_err("expected invalid number error");
        assert!(matches!(err, ConfigError::InvalidNumber("SESSION_TTL_SECS")));
        env::remove_var("SESSION_TTL_SECS");
    }

    #[test]
    fn overrides_are_read() {
        let _guard = env_guard();
        env::set_var("MCP_ADMIN_API_KEY", "admin-abc");
        clear_optional_vars();
        env::set_var("BIND_PORT", "9001");
        env::set_var("SESSION_TTL_SECS", "60");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_port, 9001);
        assert_eq!(config.session_ttl_secs, 60);

        env::remove_var("BIND_PORT");
        env::remove_var("SESSION_TTL_SECS");
    }
}
