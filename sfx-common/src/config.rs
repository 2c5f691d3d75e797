//! Tiered configuration resolution (env → TOML → compiled default)

use crate::{Error, Result};
use std::path::PathBuf;

/// Resolve a single setting following the engine's standard priority order:
/// 1. Explicit override (e.g. a CLI flag, passed in by the caller)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    override_value: Option<&str>,
    env_var_name: &str,
    toml_key: Option<&str>,
) -> Result<PathBuf> {
    if let Some(path) = override_value {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    if let Some(key) = toml_key {
        if let Some(path) = read_toml_value(key)? {
            return Ok(PathBuf::from(path));
        }
    }

    Ok(default_data_dir())
}

/// Read a top-level string value out of the engine's TOML config file, if one exists.
/// Missing file or missing key is not an error; malformed TOML is.
fn read_toml_value(key: &str) -> Result<Option<String>> {
    let Some(config_path) = config_file_path() else {
        return Ok(None);
    };
    if !config_path.exists() {
        return Ok(None);
    }
    let toml_content = std::fs::read_to_string(&config_path)?;
    let config: toml::Value = toml::from_str(&toml_content)
        .map_err(|e| Error::Config(format!("invalid config file {:?}: {e}", config_path)))?;
    Ok(config.get(key).and_then(|v| v.as_str()).map(str::to_string))
}

/// Location of the engine's TOML config file, platform-appropriate.
fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sfx-library").join("config.toml"))
}

/// OS-dependent default data directory for caches and persisted state.
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("sfx-library"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sfx-library"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("sfx-library"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sfx-library"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("sfx-library"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sfx-library"))
    }
}
