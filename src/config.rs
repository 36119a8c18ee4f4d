//! Relay configuration
//!
//! Loaded from environment variables, every one of them optional.

use std::env;
use std::time::Duration;

use crate::connection::{OutboxConfig, OverflowPolicy};
use crate::error::RelayError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Fanout and backpressure configuration
    pub relay: RelayConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 3005)
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Per-connection outbox settings
    pub outbox: OutboxConfig,
    /// Largest accepted inbound payload in bytes
    pub max_payload_bytes: usize,
    /// How long shutdown waits for outboxes to flush
    pub drain_timeout: Duration,
    /// Relay messages back to their sender as well
    pub echo_to_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3005,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbox: OutboxConfig::default(),
            max_payload_bytes: 64 * 1024,
            drain_timeout: Duration::from_millis(5000),
            echo_to_sender: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, RelayError> {
        let max_dropped = get_env_or("RELAY_MAX_DROPPED", "");
        let max_dropped = if max_dropped.trim().is_empty() {
            None
        } else {
            Some(max_dropped.trim().parse().map_err(|_| {
                RelayError::InvalidConfig("RELAY_MAX_DROPPED must be a valid number".into())
            })?)
        };

        let capacity: usize = get_env_or("RELAY_OUTBOX_CAPACITY", "64")
            .parse()
            .map_err(|_| {
                RelayError::InvalidConfig("RELAY_OUTBOX_CAPACITY must be a valid number".into())
            })?;
        if capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "RELAY_OUTBOX_CAPACITY must be at least 1".into(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                host: get_env_or("RELAY_HOST", "0.0.0.0"),
                port: get_env_or("RELAY_PORT", "3005").parse().map_err(|_| {
                    RelayError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
            },
            relay: RelayConfig {
                outbox: OutboxConfig {
                    capacity,
                    policy: get_env_or("RELAY_OVERFLOW_POLICY", "drop_oldest").parse()?,
                    max_dropped,
                },
                max_payload_bytes: get_env_or("RELAY_MAX_PAYLOAD_BYTES", "65536")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig(
                            "RELAY_MAX_PAYLOAD_BYTES must be a valid number".into(),
                        )
                    })?,
                drain_timeout: Duration::from_millis(
                    get_env_or("RELAY_DRAIN_TIMEOUT_MS", "5000")
                        .parse()
                        .map_err(|_| {
                            RelayError::InvalidConfig(
                                "RELAY_DRAIN_TIMEOUT_MS must be a valid number".into(),
                            )
                        })?,
                ),
                echo_to_sender: get_env_or("RELAY_ECHO_TO_SENDER", "false")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig(
                            "RELAY_ECHO_TO_SENDER must be true or false".into(),
                        )
                    })?,
            },
        })
    }

    /// Get the listener address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "RELAY_HOST",
        "RELAY_PORT",
        "RELAY_OUTBOX_CAPACITY",
        "RELAY_OVERFLOW_POLICY",
        "RELAY_MAX_DROPPED",
        "RELAY_MAX_PAYLOAD_BYTES",
        "RELAY_DRAIN_TIMEOUT_MS",
        "RELAY_ECHO_TO_SENDER",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.port, 3005);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.listen_addr(), "0.0.0.0:3005");
        assert_eq!(config.relay.outbox.capacity, 64);
        assert_eq!(config.relay.outbox.policy, OverflowPolicy::DropOldest);
        assert!(config.relay.outbox.max_dropped.is_none());
        assert_eq!(config.relay.max_payload_bytes, 65536);
        assert_eq!(config.relay.drain_timeout, Duration::from_secs(5));
        assert!(!config.relay.echo_to_sender);
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("RELAY_PORT", "9000");
        env::set_var("RELAY_OUTBOX_CAPACITY", "8");
        env::set_var("RELAY_OVERFLOW_POLICY", "reject_new");
        env::set_var("RELAY_MAX_DROPPED", "100");
        env::set_var("RELAY_DRAIN_TIMEOUT_MS", "250");
        env::set_var("RELAY_ECHO_TO_SENDER", "true");

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.relay.outbox.capacity, 8);
        assert_eq!(config.relay.outbox.policy, OverflowPolicy::RejectNew);
        assert_eq!(config.relay.outbox.max_dropped, Some(100));
        assert_eq!(config.relay.drain_timeout, Duration::from_millis(250));
        assert!(config.relay.echo_to_sender);
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("RELAY_PORT", "not-a-port");
        assert!(matches!(
            Config::from_env(),
            Err(RelayError::InvalidConfig(_))
        ));
        env::remove_var("RELAY_PORT");

        env::set_var("RELAY_OUTBOX_CAPACITY", "0");
        assert!(Config::from_env().is_err());
        env::remove_var("RELAY_OUTBOX_CAPACITY");

        env::set_var("RELAY_OVERFLOW_POLICY", "block");
        assert!(Config::from_env().is_err());
        env::remove_var("RELAY_OVERFLOW_POLICY");

        env::set_var("RELAY_ECHO_TO_SENDER", "yes");
        assert!(matches!(
            Config::from_env(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_overflow_policy_names_round_trip() {
        for policy in [OverflowPolicy::DropOldest, OverflowPolicy::RejectNew] {
            assert_eq!(policy.as_str().parse::<OverflowPolicy>().unwrap(), policy);
        }
    }
}
