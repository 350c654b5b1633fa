use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// Manager configuration, deserializable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Uniqueness suffix for this process's identity. Required; must differ
    /// between processes sharing a backend, or they will recover each
    /// other's in-flight work.
    pub process_id: String,
    /// Prefix applied to every backend key. Normalized to end with `:`.
    pub namespace: String,
    /// Backend address as `host:port`.
    pub server_addr: String,
    pub password: String,
    pub database: u32,
    /// Number of multiplexed backend connections to hold open.
    pub pool_size: usize,
    /// Connect with TLS (`rediss://`).
    pub tls: bool,
    /// Sentinel addresses; when non-empty, the master is resolved through
    /// them instead of `server_addr`. Requires `master_name`.
    pub sentinel_addrs: Vec<String>,
    pub master_name: String,
    /// Scheduled-poller cadence. Each tick is jittered ±50%.
    pub poll_interval_ms: u64,
    /// Grace period for in-flight handlers at shutdown.
    pub shutdown_timeout_ms: u64,
    /// Optional process tag recorded in the heartbeat.
    pub tag: String,
    /// Optional labels recorded in the heartbeat.
    pub labels: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            process_id: String::new(),
            namespace: String::new(),
            server_addr: "localhost:6379".to_string(),
            password: String::new(),
            database: 0,
            pool_size: 10,
            tls: false,
            sentinel_addrs: Vec::new(),
            master_name: String::new(),
            poll_interval_ms: 15_000,
            shutdown_timeout_ms: 8_000,
            tag: String::new(),
            labels: Vec::new(),
        }
    }
}

impl Options {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.process_id.is_empty() {
            return Err(Error::Config("process_id is required".into()));
        }
        if !self.sentinel_addrs.is_empty() && self.master_name.is_empty() {
            return Err(Error::Config(
                "master_name is required when sentinel_addrs is set".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Connection URL for the given `host:port`.
    pub(crate) fn url_for(&self, addr: &str) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = if self.password.is_empty() {
            String::new()
        } else {
            format!(":{}@", self.password)
        };
        format!("{scheme}://{auth}{addr}/{}", self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_option_values() {
        let opts = Options::default();
        assert_eq!(opts.server_addr, "localhost:6379");
        assert_eq!(opts.database, 0);
        assert_eq!(opts.pool_size, 10);
        assert_eq!(opts.poll_interval(), Duration::from_secs(15));
        assert_eq!(opts.shutdown_timeout(), Duration::from_secs(8));
        assert!(opts.namespace.is_empty());
        assert!(opts.tag.is_empty());
    }

    #[test]
    fn validate_requires_process_id() {
        let err = Options::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let opts = Options {
            process_id: "worker-1".into(),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn validate_rejects_sentinels_without_master_name() {
        let opts = Options {
            process_id: "worker-1".into(),
            sentinel_addrs: vec!["s1:26379".into()],
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = Options {
            master_name: "mymaster".into(),
            ..opts
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_sizes() {
        let opts = Options {
            process_id: "w".into(),
            pool_size: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = Options {
            process_id: "w".into(),
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn url_reflects_tls_password_and_database() {
        let opts = Options {
            process_id: "w".into(),
            database: 2,
            ..Default::default()
        };
        assert_eq!(opts.url_for("localhost:6379"), "redis://localhost:6379/2");

        let opts = Options {
            password: "hunter2".into(),
            tls: true,
            ..opts
        };
        assert_eq!(
            opts.url_for("redis.internal:6380"),
            "rediss://:hunter2@redis.internal:6380/2"
        );
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            process_id = "worker-1"
            namespace = "sidekiq"
            server_addr = "10.0.0.5:6379"
            pool_size = 4
            poll_interval_ms = 5000
            shutdown_timeout_ms = 2000
            tag = "api"
            labels = ["canary"]
        "#;
        let opts: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.process_id, "worker-1");
        assert_eq!(opts.namespace, "sidekiq");
        assert_eq!(opts.server_addr, "10.0.0.5:6379");
        assert_eq!(opts.pool_size, 4);
        assert_eq!(opts.poll_interval(), Duration::from_secs(5));
        assert_eq!(opts.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(opts.tag, "api");
        assert_eq!(opts.labels, vec!["canary"]);
    }

    #[test]
    fn toml_parsing_partial_config_keeps_defaults() {
        let opts: Options = toml::from_str("process_id = \"w\"").unwrap();
        assert_eq!(opts.process_id, "w");
        assert_eq!(opts.server_addr, "localhost:6379");
        assert_eq!(opts.poll_interval_ms, 15_000);
    }
}
