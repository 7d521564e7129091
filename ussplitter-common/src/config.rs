//! Data directory resolution

use std::path::PathBuf;

/// Environment variable overriding the server data directory
pub const DATA_DIR_ENV: &str = "USSPLITTER_DATA_DIR";

/// Data directory resolution, priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config value
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(
    cli_arg: Option<PathBuf>,
    env_var_name: &str,
    toml_value: Option<PathBuf>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path;
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path;
    }

    default_data_dir()
}

/// Get OS-dependent default data directory for the server
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/ussplitter
        dirs::data_local_dir()
            .map(|d| d.join("ussplitter"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/ussplitter"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/ussplitter
        dirs::data_dir()
            .map(|d| d.join("ussplitter"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/ussplitter"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\ussplitter
        dirs::data_local_dir()
            .map(|d| d.join("ussplitter"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\ussplitter"))
    } else {
        PathBuf::from("./ussplitter_data")
    }
}

/// Default location of the addon's `key=value` config file.
///
/// The host application has no config API for addons, so the file lives in
/// its data directory: `<local data>/usdb_syncer/addon_config/ussplitter.txt`.
pub fn default_addon_config_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("usdb_syncer")
        .join("addon_config")
        .join("ussplitter.txt")
}
