use std::{env, fmt, fs, io, path};

use proxyup::Settings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub geoip: GeoIp,
    pub telegram: Telegram,
    pub logging: Logging,
    /// Seed for the persisted check settings, and the source of SIGHUP reloads
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: String,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "proxyup.db".into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIp {
    /// MaxMind ISP database. Startup fails if set and unreadable.
    pub isp_database: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Telegram {
    pub enabled: bool,
    pub token: String,
    pub chat_id: String,
    /// Post a status summary of every proxy once a day
    pub daily_summary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/proxyup/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("proxyup/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let settings = &self.settings;

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "GeoIP")?;
        write_1(f, "ISP Database", &self.geoip.isp_database.as_deref().unwrap_or("(disabled)"))?;
        write_title_1(f, "Telegram")?;
        write_1(f, "Enabled", &self.telegram.enabled)?;
        write_1(f, "Token", &if self.telegram.token.is_empty() { "(unset)" } else { "***" })?;
        write_1(f, "Chat ID", &self.telegram.chat_id)?;
        write_1(f, "Daily Summary", &self.telegram.daily_summary)?;
        write_title_1(f, "Checks")?;
        write_1(f, "Liveness Interval (min)", &settings.liveness_interval_minutes)?;
        write_1(f, "Throughput Interval (min)", &settings.throughput_interval_minutes)?;
        write_1(f, "Timeout (s)", &settings.timeout_seconds)?;
        write_1(f, "Health Check URL", &settings.health_check_url)?;
        write_1(f, "Egress IP URL", &settings.egress_ip_url)?;
        write_1(f, "Stuck Threshold (h)", &settings.stuck_threshold_hours)?;
        write_1(f, "Low Speed Threshold (Mbps)", &settings.low_speed_threshold_mbps)?;

        Ok(())
    }
}

impl Config {
    /// Resolve the path a config would be read from
    pub fn resolve_path(optional_path: Option<impl AsRef<path::Path>>) -> Result<path::PathBuf, Error> {
        match optional_path {
            Some(path) => Ok(normalize_toml_path(path.as_ref())),
            None => default_config_path(),
        }
    }

    /// Read a config file, creating it with defaults if it does not exist
    pub fn load(config_path: &path::Path) -> Result<Self, Error> {
        if config_path.exists() {
            let raw_string = fs::read_to_string(config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.into(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path.into(), source })
        } else {
            let config = Self::default();
            config.write_config(config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: path.into(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.into(), source })
    }
}
