//! Agent configuration.
//!
//! Parsed from `etc/agentd.conf` (TOML) by the readconfig sub-command
//! inside the chroot, then shipped to the supervisor as a framed `STRING`
//! packet in canonical form. Everything has a default so an empty file is
//! a valid configuration.

use agentd_ipc::{IpcError, blocking};
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use thiserror::Error;

/// The unprivileged identity services are demoted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    /// User name.
    pub user: String,
    /// Group name.
    pub group: String,
}

/// Canonization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonizationConfig {
    /// Seconds between canonization passes.
    #[serde(default = "default_block_max_seconds")]
    pub max_seconds: u64,
    /// Largest number of transactions promoted into one block.
    #[serde(default = "default_block_max_transactions")]
    pub max_transactions: u64,
}

impl Default for CanonizationConfig {
    fn default() -> Self {
        CanonizationConfig {
            max_seconds: default_block_max_seconds(),
            max_transactions: default_block_max_transactions(),
        }
    }
}

fn default_block_max_seconds() -> u64 {
    5
}

fn default_block_max_transactions() -> u64 {
    500
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_dir() -> String {
    "log".to_string()
}

fn default_log_level() -> u64 {
    4
}

/// The agent configuration.
///
/// Scalar fields precede the tables so the canonical serialized form is
/// valid TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Log directory, relative to the prefix.
    #[serde(default = "default_log_dir")]
    pub logdir: String,
    /// Log verbosity, 0 (quiet) through 9.
    #[serde(default = "default_log_level")]
    pub loglevel: u64,
    /// Data directory the data service opens, relative to the prefix.
    #[serde(default = "default_data_dir")]
    pub datadir: String,
    /// File holding the agent's 32-byte session secret, relative to the
    /// prefix.
    #[serde(default)]
    pub secret_file: Option<String>,
    /// File holding the root block certificate, relative to the prefix.
    #[serde(default)]
    pub rootblock_file: Option<String>,
    /// Further filesystem root the supervisor enters after reading the
    /// config, relative to the prefix.
    #[serde(default)]
    pub chroot_dir: Option<String>,
    /// Addresses the listen service binds, as `host:port` strings.
    #[serde(default)]
    pub listen: Vec<String>,
    /// Unprivileged identity for services.
    #[serde(default)]
    pub usergroup: Option<UserGroup>,
    /// Canonization parameters.
    #[serde(default)]
    pub canonization: CanonizationConfig,
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML did not parse or did not match the schema.
    #[error("config parse failed: {0}")]
    Parse(String),

    /// The framed transfer failed.
    #[error("config transfer failed: {0}")]
    Transfer(#[from] IpcError),
}

impl Default for AgentConfig {
    fn default() -> Self {
        // An empty document takes every default.
        toml::from_str("").expect("empty config must parse")
    }
}

impl AgentConfig {
    /// Parses a configuration document.
    pub fn from_toml(text: &str) -> Result<AgentConfig, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Canonical serialized form.
    pub fn to_toml(&self) -> String {
        toml::to_string(self).expect("config serialization cannot fail")
    }
}

/// Ships a parsed configuration over a socket as one framed packet.
pub fn send(fd: RawFd, config: &AgentConfig) -> Result<(), ConfigError> {
    blocking::write_string(fd, &config.to_toml())?;
    Ok(())
}

/// Receives a configuration shipped by [`send`].
pub fn recv(fd: RawFd) -> Result<AgentConfig, ConfigError> {
    let text = blocking::read_string(fd)?;
    AgentConfig::from_toml(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_ipc::socket;

    #[test]
    fn empty_document_takes_defaults() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config.logdir, "log");
        assert_eq!(config.loglevel, 4);
        assert_eq!(config.datadir, "data");
        assert!(config.secret_file.is_none());
        assert!(config.rootblock_file.is_none());
        assert!(config.chroot_dir.is_none());
        assert!(config.usergroup.is_none());
        assert!(config.listen.is_empty());
        assert_eq!(config.canonization.max_seconds, 5);
        assert_eq!(config.canonization.max_transactions, 500);
    }

    #[test]
    fn full_document_parses() {
        let config = AgentConfig::from_toml(
            r#"
            logdir = "log"
            loglevel = 7
            datadir = "data/blocks"
            secret_file = "etc/agent.key"
            rootblock_file = "root/root.cert"
            chroot_dir = "jail"
            listen = ["0.0.0.0:4931", "127.0.0.1:4932"]

            [usergroup]
            user = "agent"
            group = "agent"

            [canonization]
            max_seconds = 2
            max_transactions = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.loglevel, 7);
        assert_eq!(config.datadir, "data/blocks");
        assert_eq!(config.secret_file.as_deref(), Some("etc/agent.key"));
        assert_eq!(config.rootblock_file.as_deref(), Some("root/root.cert"));
        assert_eq!(config.chroot_dir.as_deref(), Some("jail"));
        assert_eq!(
            config.usergroup,
            Some(UserGroup {
                user: "agent".to_string(),
                group: "agent".to_string()
            })
        );
        assert_eq!(config.listen.len(), 2);
        assert_eq!(config.canonization.max_seconds, 2);
        assert_eq!(config.canonization.max_transactions, 64);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AgentConfig::from_toml("no_such_option = 1").is_err());
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(AgentConfig::from_toml("listen = [").is_err());
    }

    #[test]
    fn canonical_round_trip() {
        let mut config = AgentConfig::default();
        config.loglevel = 9;
        config.listen.push("0.0.0.0:4931".to_string());
        let parsed = AgentConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn framed_transfer_round_trip() {
        let (lhs, rhs) = socket::stream_pair().unwrap();
        let mut config = AgentConfig::default();
        config.datadir = "data/chain".to_string();

        send(lhs, &config).unwrap();
        let received = recv(rhs).unwrap();
        assert_eq!(received, config);

        socket::close(lhs).unwrap();
        socket::close(rhs).unwrap();
    }
}
