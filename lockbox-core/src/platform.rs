//! Platform-specific default locations

use std::path::PathBuf;

const APP_DIR: &str = "Lockbox";

/// Get the platform-specific data directory for storing application data
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\Lockbox
/// - macOS: ~/Library/Application Support/Lockbox
/// - Linux/Other: ~/.local/share/Lockbox
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the default vault database path
pub fn get_default_vault_path() -> PathBuf {
    get_data_dir().join("vault.db")
}

/// Get the default directory for locally persisted fallback keys
pub fn get_default_key_dir() -> PathBuf {
    get_data_dir().join("keys")
}

/// Get the default config file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("lockbox.toml")
}
