//! Bootstrap configuration.
//!
//! Built from the command line before any privilege is dropped and
//! read-only afterward: foreground flag, the resolved binary path, the
//! installation prefix derived from it, and the config file location
//! relative to the prefix.

use crate::path::{self, PathError};
use std::env;

/// Default config file location, relative to the prefix after chroot.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/agentd.conf";

/// Command-line derived configuration for process bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Run in the foreground (do not daemonize).
    pub foreground: bool,
    /// Fully-resolved path of the agentd binary.
    pub binary: Option<String>,
    /// Installation prefix: the parent of the binary's directory.
    pub prefix_dir: Option<String>,
    /// Config file path inside the prefix.
    pub config_file: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            foreground: false,
            binary: None,
            prefix_dir: None,
            config_file: DEFAULT_CONFIG_FILE.to_string(),
        }
    }
}

impl BootstrapConfig {
    /// A fresh bootstrap config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the foreground flag.
    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    /// Resolves the invoked binary name against `PATH` plus the system
    /// default path and records the result.
    pub fn set_binary(&mut self, name: &str) -> Result<(), PathError> {
        let path_env = env::var("PATH").unwrap_or_default();
        let search = path::append_default(&path_env);
        self.binary = Some(path::resolve(name, &search)?);
        Ok(())
    }

    /// Derives the prefix directory as the parent of the binary's
    /// directory. Requires a resolved binary.
    pub fn resolve_prefix_dir(&mut self) -> Result<(), PathError> {
        let binary = self.binary.as_deref().ok_or(PathError::Invalid)?;
        let bindir = path::dirname(binary)?;
        self.prefix_dir = Some(path::dirname(&bindir)?);
        Ok(())
    }

    /// Overrides the config file path.
    pub fn set_config_file(&mut self, file: &str) {
        self.config_file = file.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let bconf = BootstrapConfig::new();
        assert!(!bconf.foreground);
        assert!(bconf.binary.is_none());
        assert!(bconf.prefix_dir.is_none());
        assert_eq!(bconf.config_file, DEFAULT_CONFIG_FILE);
    }

    #[test]
    fn foreground_flag() {
        let mut bconf = BootstrapConfig::new();
        bconf.set_foreground(true);
        assert!(bconf.foreground);
    }

    #[test]
    fn binary_resolution_via_absolute_path() {
        let mut bconf = BootstrapConfig::new();
        bconf.set_binary("/bin/cat").unwrap();
        assert_eq!(bconf.binary.as_deref(), Some("/bin/cat"));
    }

    #[test]
    fn prefix_is_grandparent_of_binary() {
        let mut bconf = BootstrapConfig::new();
        bconf.binary = Some("/usr/local/bin/agentd".to_string());
        bconf.resolve_prefix_dir().unwrap();
        assert_eq!(bconf.prefix_dir.as_deref(), Some("/usr/local"));
    }

    #[test]
    fn prefix_requires_resolved_binary() {
        let mut bconf = BootstrapConfig::new();
        assert_eq!(bconf.resolve_prefix_dir(), Err(PathError::Invalid));
    }

    #[test]
    fn unresolvable_binary_fails() {
        let mut bconf = BootstrapConfig::new();
        assert!(bconf.set_binary("no-such-binary-on-this-host").is_err());
    }

    #[test]
    fn config_file_override() {
        let mut bconf = BootstrapConfig::new();
        bconf.set_config_file("/etc/other.conf");
        assert_eq!(bconf.config_file, "/etc/other.conf");
    }
}
