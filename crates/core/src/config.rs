//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Largest accepted restore header in bytes.
    #[serde(default = "default_max_header_size")]
    pub max_header_size: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_header_size() -> u64 {
    crate::DEFAULT_MAX_HEADER_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_header_size: default_max_header_size(),
        }
    }
}

/// Restore engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Directory under which scratch and published restore directories live.
    #[serde(default = "default_restore_root")]
    pub restore_root: PathBuf,
    /// How long a paused restore waits for a client to resume, in seconds.
    #[serde(default = "default_reattach_timeout_secs")]
    pub reattach_timeout_secs: u64,
    /// How long a resume request waits for the process to accept the new
    /// connection, in seconds.
    #[serde(default = "default_resume_accept_timeout_secs")]
    pub resume_accept_timeout_secs: u64,
    /// Delay between a successful restore and the service restart, in seconds.
    #[serde(default = "default_restart_grace_period_secs")]
    pub restart_grace_period_secs: u64,
    /// Upper bound for an interrupt request waiting on the pause, in seconds.
    #[serde(default = "default_interrupt_timeout_secs")]
    pub interrupt_timeout_secs: u64,
}

fn default_restore_root() -> PathBuf {
    PathBuf::from("./data/restore")
}

fn default_reattach_timeout_secs() -> u64 {
    86400 // 24 hours
}

fn default_resume_accept_timeout_secs() -> u64 {
    10
}

fn default_restart_grace_period_secs() -> u64 {
    5
}

fn default_interrupt_timeout_secs() -> u64 {
    60
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_root: default_restore_root(),
            reattach_timeout_secs: default_reattach_timeout_secs(),
            resume_accept_timeout_secs: default_resume_accept_timeout_secs(),
            restart_grace_period_secs: default_restart_grace_period_secs(),
            interrupt_timeout_secs: default_interrupt_timeout_secs(),
        }
    }
}

impl RestoreConfig {
    pub fn reattach_timeout(&self) -> Duration {
        Duration::from_secs(self.reattach_timeout_secs)
    }

    pub fn resume_accept_timeout(&self) -> Duration {
        Duration::from_secs(self.resume_accept_timeout_secs)
    }

    pub fn restart_grace_period(&self) -> Duration {
        Duration::from_secs(self.restart_grace_period_secs)
    }

    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_secs(self.interrupt_timeout_secs)
    }

    /// Validate restore configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.restore_root.as_os_str().is_empty() {
            return Err("restore.restore_root must not be empty".to_string());
        }
        if self.reattach_timeout_secs == 0 {
            return Err("restore.reattach_timeout_secs must be greater than zero".to_string());
        }
        if self.resume_accept_timeout_secs == 0 {
            return Err(
                "restore.resume_accept_timeout_secs must be greater than zero".to_string(),
            );
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Restore engine configuration.
    #[serde(default)]
    pub restore: RestoreConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `restore_root`.
    ///
    /// **For testing only.** Short timeouts, no restart grace period.
    pub fn for_testing(restore_root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                metrics_enabled: false,
                ..Default::default()
            },
            restore: RestoreConfig {
                restore_root: restore_root.into(),
                reattach_timeout_secs: 5,
                resume_accept_timeout_secs: 2,
                restart_grace_period_secs: 0,
                interrupt_timeout_secs: 5,
            },
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.max_header_size == 0 {
            return Err("server.max_header_size must be greater than zero".to_string());
        }
        self.restore.validate()
    }
}
