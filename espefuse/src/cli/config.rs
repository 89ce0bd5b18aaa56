//! Command-line interface configuration
//!
//! [espefuse] reads its defaults from an `espefuse.toml` file, which is looked
//! up in the current directory, its parent directory and finally the user's
//! configuration directory:
//!
//! ```toml
//! [device]
//! catalog = "esp32c3.toml"
//! device_file = "efuses.bin"
//! do_not_confirm = false
//! ```
//!
//! Relative paths are resolved against the directory of the configuration
//! file. Arguments given on the command line take precedence.
//!
//! [espefuse]: https://crates.io/crates/espefuse

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::Error;

const CONFIG_FILE: &str = "espefuse.toml";

/// Device configuration
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// eFuse catalog describing the blocks and fields of the device
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    /// Image of the eFuse blocks of a virtual device
    #[serde(default)]
    pub device_file: Option<PathBuf>,
    /// Burn without asking for confirmation
    #[serde(default)]
    pub do_not_confirm: bool,
}

/// Configuration loaded from `espefuse.toml`
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device configuration
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from the configuration file, if there is one.
    pub fn load() -> Result<Self> {
        let path = Self::find_config_path(CONFIG_FILE)?;
        if !path.exists() {
            debug!("No configuration file found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw_data = read_to_string(path)
            .map_err(|err| Error::FileOpenError(path.display().to_string(), err))?;

        let mut config = Self::from_toml_str(&raw_data)
            .wrap_err_with(|| format!("Failed to parse configuration file {}", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        debug!("Config: {:#?}", &config);

        Ok(config)
    }

    fn from_toml_str(raw_data: &str) -> Result<Self> {
        let toml_value = toml::from_str::<toml::Value>(raw_data).into_diagnostic()?;
        if let toml::Value::Table(top_level) = &toml_value {
            Self::validate_keys(top_level)?;
        }

        toml::from_str(raw_data).into_diagnostic()
    }

    fn validate_keys(top_level: &toml::map::Map<String, toml::Value>) -> Result<()> {
        let device_keys = ["catalog", "device_file", "do_not_confirm"];

        let mut misplaced_keys = Vec::new();
        for key in device_keys {
            for (section_name, value) in top_level {
                if let toml::Value::Table(table) = value {
                    if table.contains_key(key) && section_name != "device" {
                        misplaced_keys.push(key);
                    }
                }
            }
            if top_level.contains_key(key) {
                misplaced_keys.push(key);
            }
        }

        if misplaced_keys.is_empty() {
            Ok(())
        } else {
            let msg = misplaced_keys
                .into_iter()
                .map(|key| format!("'{key}' should be under [device]!"))
                .collect::<Vec<_>>()
                .join(", ");
            Err(Error::MisplacedKey(msg).into())
        }
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for path in [&mut self.device.catalog, &mut self.device.device_file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }

    fn find_config_path(filename: &str) -> Result<PathBuf, Error> {
        let local_config = std::env::current_dir()?.join(filename);
        if local_config.exists() {
            return Ok(local_config);
        }
        if let Some(parent_folder) = std::env::current_dir()?.parent() {
            let workspace_config = parent_folder.join(filename);
            if workspace_config.exists() {
                return Ok(workspace_config);
            }
        }

        match ProjectDirs::from("rs", "esp", "espefuse") {
            Some(project_dirs) => Ok(project_dirs.config_dir().join(filename)),
            None => Ok(local_config),
        }
    }
}
