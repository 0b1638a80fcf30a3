//! Common utilities shared between commands.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Load a JSON config file, requiring it to exist.
pub fn load_config<T: DeserializeOwned>(config_path: Option<&str>, config_name: &str) -> Result<T> {
    let path = config_path.ok_or_else(|| {
        anyhow::anyhow!("--config is required. Use `ptq generate-config` to create {}", config_name)
    })?;

    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path))?;

    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse config: {}", path))
}

/// Require an existing directory.
pub fn require_dir(path: &str) -> Result<&Path> {
    let dir = Path::new(path);
    if !dir.is_dir() {
        anyhow::bail!("Expected a directory: {}", path);
    }
    Ok(dir)
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
