use std::path::PathBuf;

const TOKEN_FILE_NAME: &str = "azloginAccessToken.json";

/// Directory holding `login.toml`.
///
/// `AZLOGIN_CONFIG_DIR` wins over the platform config directory.
pub(crate) fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = non_empty_env("AZLOGIN_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "azlogin").map(|d| d.config_dir().to_path_buf())
}

/// Default credential file, kept next to the Azure CLI token cache.
pub(crate) fn default_token_path() -> PathBuf {
    azure_config_dir().join(TOKEN_FILE_NAME)
}

fn azure_config_dir() -> PathBuf {
    if let Some(dir) = non_empty_env("AZURE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    directories::BaseDirs::new()
        .map(|b| b.home_dir().join(".azure"))
        .unwrap_or_else(|| PathBuf::from(".azure"))
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
