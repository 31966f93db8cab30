//! Configuration: global sampling settings and the ordered list of targets.

mod loader;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use loader::{default_config_path, ConfigLoader, DEFAULT_CONFIG, DEFAULT_FILE_NAME};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WIDTH: u32 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] ini::ParseError),
    #[error("missing [global] section")]
    MissingGlobal,
}

/// One `[targets]` entry after alias expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Display name, also the name of its optional settings section
    pub name: String,
    /// Registered source type
    pub kind: String,
    pub target: String,
    /// Per-source sampling interval; the global one applies when unset
    pub refresh_interval: Option<Duration>,
}

impl TargetConfig {
    /// Expand a `type=target` pair, resolving the `bw` alias and deriving the
    /// display name.
    pub fn from_pair(key: &str, value: &str) -> Self {
        let (kind, target) = match key {
            "bw" => match value.strip_prefix("snmp1,") {
                Some(rest) => ("snmp", rest),
                None => ("if_thr", value),
            },
            other => (other, value),
        };

        let name = if kind == "snmp" {
            match target.splitn(3, ',').collect::<Vec<_>>().as_slice() {
                [host, _community, if_index] => format!("BW - {host}:{if_index}"),
                _ => format!("BW - {target}"),
            }
        } else if key == "bw" {
            format!("BW - {target}")
        } else if kind == "shell" {
            let command = target.split('|').next().unwrap_or(target);
            format!("{} - {}", key.to_uppercase(), command.trim_end_matches([' ', '\t']))
        } else {
            format!("{} - {}", key.to_uppercase(), target)
        };

        Self {
            name,
            kind: kind.to_string(),
            target: target.to_string(),
            refresh_interval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub refresh_interval: Duration,
    /// Plot width in pixels; sample channels hold two fewer points
    pub default_width: u32,
    pub targets: Vec<TargetConfig>,
    /// File the configuration was read from
    pub path: PathBuf,
}

impl Config {
    /// Ring buffer capacity for the configured width.
    pub fn buffer_capacity(&self) -> usize {
        buffer_capacity(self.default_width)
    }
}

pub fn buffer_capacity(width: u32) -> usize {
    (width as usize).saturating_sub(2).max(1)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            default_width: DEFAULT_WIDTH,
            targets: Vec::new(),
            path: PathBuf::new(),
        }
    }
}
