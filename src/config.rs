//! # Configuration Module
//!
//! Handles loading and validating the local device configuration from a TOML
//! file.
//!
//! This is the configuration that never changes remotely: store credentials,
//! controller script locations and file paths. The operational settings that
//! the dashboard edits live in the remote settings document handled by
//! [`crate::settings`].

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default path of the device configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/home/pi/fieldcam.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Remote file store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store host name. Empty means "run the cycle offline".
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_store_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Base directory on the store; empty stays in the login directory.
    #[serde(default)]
    pub directory: String,

    /// Navigate into a per-camera subdirectory (camera name + hardware id)
    /// so several cameras can share one store account.
    #[serde(default)]
    pub multiple_cameras: bool,
}

/// Camera identity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_camera_name")]
    pub name: String,
}

/// Power controller command surface configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Directory holding the controller's utility scripts.
    #[serde(default = "default_controller_dir")]
    pub dir: String,

    #[serde(default = "default_apply_attempts")]
    pub apply_attempts: u32,
}

/// Local file locations
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Working directory for downloaded/spooled files.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Rendered schedule document consumed by the controller.
    #[serde(default = "default_schedule_file")]
    pub schedule_file: PathBuf,

    /// Telemetry spool holding undelivered batches.
    #[serde(default = "default_spool_file")]
    pub spool_file: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Telemetry delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Delete the spool when it is loaded (before the remote append is
    /// acknowledged). `false` switches to delete-after-ack.
    #[serde(default = "default_legacy_spool_delete")]
    pub legacy_spool_delete: bool,

    /// Name of the append-only telemetry log on the store.
    #[serde(default = "default_remote_log")]
    pub remote_log: String,

    /// Name of the settings document, locally and on the store.
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
}

// Default value functions
fn default_store_port() -> u16 { 21 }
fn default_camera_name() -> String { "FieldCam".to_string() }
fn default_controller_dir() -> String { "/home/pi/wittypi".to_string() }
fn default_apply_attempts() -> u32 { 5 }
fn default_local_dir() -> PathBuf { PathBuf::from("/home/pi") }
fn default_schedule_file() -> PathBuf { PathBuf::from("/home/pi/wittypi/schedule.wpi") }
fn default_spool_file() -> PathBuf { PathBuf::from("/home/pi/diagnostics.json") }
fn default_log_dir() -> PathBuf { PathBuf::from("./logs") }
fn default_legacy_spool_delete() -> bool { true }
fn default_remote_log() -> String { "diagnostics.json".to_string() }
fn default_settings_file() -> String { "settings.json".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_store_port(),
            username: String::new(),
            password: String::new(),
            directory: String::new(),
            multiple_cameras: false,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { name: default_camera_name() }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dir: default_controller_dir(),
            apply_attempts: default_apply_attempts(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            schedule_file: default_schedule_file(),
            spool_file: default_spool_file(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            legacy_spool_delete: default_legacy_spool_delete(),
            remote_log: default_remote_log(),
            settings_file: default_settings_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            camera: CameraConfig::default(),
            controller: ControllerConfig::default(),
            paths: PathsConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.camera.name.is_empty() {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("camera name cannot be empty")
            ));
        }

        if self.store.port == 0 {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("store port must be greater than 0")
            ));
        }

        if self.controller.dir.is_empty() {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("controller dir cannot be empty")
            ));
        }

        if self.controller.apply_attempts == 0 || self.controller.apply_attempts > 10 {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("apply_attempts must be between 1 and 10")
            ));
        }

        if self.telemetry.remote_log.is_empty() {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("remote_log cannot be empty")
            ));
        }

        if self.telemetry.settings_file.is_empty() {
            return Err(crate::error::FieldcamError::Config(
                toml::de::Error::custom("settings_file cannot be empty")
            ));
        }

        Ok(())
    }

    /// Directory name identifying this camera on a shared store:
    /// camera name plus the unique hardware id.
    pub fn camera_directory_name(&self) -> String {
        format!("{}_{}", self.camera.name, device_id())
    }
}

/// Unique hardware id of the device, read from the `Serial` line of
/// `/proc/cpuinfo`. Falls back to a recognizable error marker so the
/// directory name stays usable.
pub fn device_id() -> String {
    read_device_id("/proc/cpuinfo").unwrap_or_else(|| "ERROR000000000".to_string())
}

fn read_device_id<P: AsRef<Path>>(cpuinfo: P) -> Option<String> {
    let contents = fs::read_to_string(cpuinfo).ok()?;
    for line in contents.lines() {
        if line.starts_with("Serial") {
            let serial = line.split(':').nth(1)?.trim();
            if !serial.is_empty() {
                return Some(serial.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.port, 21);
        assert_eq!(config.camera.name, "FieldCam");
        assert!(config.telemetry.legacy_spool_delete);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[store]
host = "files.example.net"
username = "camera1"
password = "secret"
directory = "cameras"
multiple_cameras = true

[camera]
name = "Ridgeline"

[telemetry]
legacy_spool_delete = false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.store.host, "files.example.net");
        assert!(config.store.multiple_cameras);
        assert_eq!(config.camera.name, "Ridgeline");
        assert!(!config.telemetry.legacy_spool_delete);
        // Untouched sections fall back to defaults
        assert_eq!(config.controller.apply_attempts, 5);
        assert_eq!(config.paths.schedule_file, PathBuf::from("/home/pi/wittypi/schedule.wpi"));
    }

    #[test]
    fn test_empty_camera_name() {
        let mut config = Config::default();
        config.camera.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_port_zero() {
        let mut config = Config::default();
        config.store.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_attempts_zero() {
        let mut config = Config::default();
        config.controller.apply_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_attempts_too_high() {
        let mut config = Config::default();
        config.controller.apply_attempts = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_remote_log() {
        let mut config = Config::default();
        config.telemetry.remote_log = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_camera_directory_name_contains_name() {
        let config = Config::default();
        assert!(config.camera_directory_name().starts_with("FieldCam_"));
    }

    #[test]
    fn test_read_device_id() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            "processor\t: 0\nmodel name\t: ARMv8\nSerial\t\t: 10000000abcdef01\n"
        )
        .unwrap();
        temp_file.flush().unwrap();

        assert_eq!(
            read_device_id(temp_file.path()),
            Some("10000000abcdef01".to_string())
        );
    }

    #[test]
    fn test_read_device_id_missing_serial() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "processor\t: 0\n").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(read_device_id(temp_file.path()), None);
    }
}
