use ini::{Ini, ParseOption};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Config, ConfigError, TargetConfig, DEFAULT_REFRESH_INTERVAL, DEFAULT_WIDTH};

pub const DEFAULT_FILE_NAME: &str = "sparkmon.ini";

/// Written when no usable configuration exists
pub const DEFAULT_CONFIG: &str = "\
[global]
refresh_interval_sec=10
default_width=400

[targets]
ping=1.1.1.1
ping=8.8.8.8
cpu=local
loadavg=local
";

/// `$XDG_CONFIG_HOME/sparkmon/<file_name>` (or the platform equivalent).
pub fn default_config_path(file_name: &Path) -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sparkmon").map(|dirs| dirs.config_dir().join(file_name))
}

/// Finds, parses and if necessary creates the configuration file.
pub struct ConfigLoader {
    requested: PathBuf,
    fallback: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(requested: impl Into<PathBuf>) -> Self {
        let requested = requested.into();
        let fallback = requested.file_name().map(Path::new).and_then(default_config_path);
        Self { requested, fallback }
    }

    /// Replace the per-user fallback location.
    pub fn with_fallback(mut self, fallback: Option<PathBuf>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Load the requested file, then the per-user one. When neither holds a
    /// valid configuration the defaults are used, and written to the
    /// requested path if nothing exists there yet.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let candidates = std::iter::once(&self.requested).chain(self.fallback.as_ref());
        for path in candidates {
            match Self::load_file(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), targets = config.targets.len(), "configuration loaded");
                    return Ok(config);
                }
                Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring configuration file"),
            }
        }

        if self.requested.exists() {
            tracing::warn!(path = %self.requested.display(), "using built-in defaults, existing file left untouched");
        } else {
            self.write_default()?;
            tracing::info!(path = %self.requested.display(), "created default configuration");
        }
        let mut config = Self::parse_str(DEFAULT_CONFIG)?;
        config.path = self.requested.clone();
        Ok(config)
    }

    fn write_default(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.requested.clone(),
            source,
        };
        if let Some(parent) = self.requested.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.requested, DEFAULT_CONFIG).map_err(io_err)
    }

    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse_str(&content)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Parse configuration text. Values are taken verbatim so shell commands
    /// keep their quotes and backslashes.
    pub fn parse_str(content: &str) -> Result<Config, ConfigError> {
        let opt = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(content, opt)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Config, ConfigError> {
        let global = ini.section(Some("global")).ok_or(ConfigError::MissingGlobal)?;

        let refresh_interval = global
            .get("refresh_interval_sec")
            .and_then(parse_interval)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let default_width = global
            .get("default_width")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&w: &u32| w > 0)
            .unwrap_or(DEFAULT_WIDTH);

        let mut targets: Vec<TargetConfig> = ini
            .section(Some("targets"))
            .map(|section| {
                section
                    .iter()
                    .map(|(key, value)| TargetConfig::from_pair(key.trim(), value.trim()))
                    .collect()
            })
            .unwrap_or_default();

        for (name, section) in ini.iter() {
            let Some(name) = name.filter(|n| *n != "global" && *n != "targets") else {
                continue;
            };
            let Some(target) = targets.iter_mut().find(|t| t.name == name) else {
                tracing::debug!(section = name, "section matches no target");
                continue;
            };
            if let Some(interval) = section.get("refresh_interval_sec").and_then(parse_interval) {
                target.refresh_interval = Some(interval);
            }
        }

        Ok(Config {
            refresh_interval,
            default_width,
            targets,
            path: PathBuf::new(),
        })
    }
}

/// Whole seconds, ignoring zero and garbage.
fn parse_interval(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_globals_and_ordered_duplicate_targets() {
        let config = ConfigLoader::parse_str(
            "[global]\nrefresh_interval_sec=5\ndefault_width=200\nline_color=00FF00\n\n\
             [targets]\nping=1.1.1.1\nping=8.8.8.8\ncpu=local\nbw=local,eth0\n",
        )
        .unwrap();

        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.default_width, 200);
        assert_eq!(config.buffer_capacity(), 198);
        let names: Vec<_> = config.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["PING - 1.1.1.1", "PING - 8.8.8.8", "CPU - local", "BW - local,eth0"]);
    }

    #[test]
    fn missing_global_is_invalid() {
        let err = ConfigLoader::parse_str("[targets]\ncpu=local\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingGlobal));
    }

    #[test]
    fn defaults_for_absent_or_bad_values() {
        let config = ConfigLoader::parse_str("[global]\nrefresh_interval_sec=0\ndefault_width=wide\n").unwrap();
        assert_eq!(config.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(config.default_width, DEFAULT_WIDTH);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn per_target_section_overrides_interval() {
        let config = ConfigLoader::parse_str(
            "[global]\n[targets]\nping=1.1.1.1\nshell=echo 1 | cat\n\n\
             [PING - 1.1.1.1]\nrefresh_interval_sec=2\n\n[SHELL - echo 1]\nrefresh_interval_sec=30\n\n\
             [unrelated]\nrefresh_interval_sec=1\n",
        )
        .unwrap();
        assert_eq!(config.targets[0].refresh_interval, Some(Duration::from_secs(2)));
        assert_eq!(config.targets[1].refresh_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn values_are_taken_verbatim() {
        let config =
            ConfigLoader::parse_str("[global]\n[targets]\nshell=awk '{print $1}' \"/proc/loadavg\"\n").unwrap();
        assert_eq!(config.targets[0].target, "awk '{print $1}' \"/proc/loadavg\"");
    }

    #[test]
    fn writes_default_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_FILE_NAME);

        let config = ConfigLoader::new(&path).with_fallback(None).load().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
        assert_eq!(config.default_width, 400);
        assert_eq!(config.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.targets.len(), 4);
        assert_eq!(config.path, path);
    }

    #[test]
    fn falls_back_to_user_config() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("missing.ini");
        let fallback = dir.path().join("user.ini");
        fs::write(&fallback, "[global]\ndefault_width=100\n[targets]\nmemory=local\n").unwrap();

        let config = ConfigLoader::new(&requested)
            .with_fallback(Some(fallback.clone()))
            .load()
            .unwrap();
        assert_eq!(config.default_width, 100);
        assert_eq!(config.path, fallback);
        assert!(!requested.exists());
    }

    #[test]
    fn invalid_existing_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        fs::write(&path, "[targets]\ncpu=local\n").unwrap();

        let config = ConfigLoader::new(&path).with_fallback(None).load().unwrap();
        assert_eq!(config.targets.len(), 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "[targets]\ncpu=local\n");
    }
}
