use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    config_dir::{config_dir, non_empty_env},
    error::{Error, Result},
    types::LoginConfig,
};

/// Public client id of the Azure CLI.
pub const CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";
pub const AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const TENANTS_URL: &str = "https://management.azure.com/tenants?api-version=2019-11-01";
/// Multi-tenant alias accepted by the authority for work and school accounts.
pub const ORGANIZATIONS_TENANT: &str = "organizations";
pub const SCOPES: &[&str] = &["offline_access", "https://management.azure.com/.default"];

const CONFIG_FILE_NAME: &str = "login.toml";

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID.into(),
            authority_url: AUTHORITY_URL.into(),
            tenants_url: TENANTS_URL.into(),
            scopes: SCOPES.iter().map(|s| (*s).to_string()).collect(),
            default_tenant: ORGANIZATIONS_TENANT.into(),
            callback_path: "/".into(),
            token_file: None,
        }
    }
}

/// Load the login configuration.
///
/// Built-in defaults, then `login.toml` from the config directory if present,
/// then `AZLOGIN_*` environment overrides.
pub fn load_login_config() -> Result<LoginConfig> {
    let mut config = match config_dir().map(|d| d.join(CONFIG_FILE_NAME)) {
        Some(path) if path.exists() => load_config_file(&path)?,
        _ => LoginConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML config file. Missing keys fall back to the defaults.
pub fn load_config_file(path: &Path) -> Result<LoginConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let config: LoginConfig = toml::from_str(&raw).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "loaded login config");
    Ok(config)
}

fn apply_env_overrides(config: &mut LoginConfig) {
    if let Some(v) = non_empty_env("AZLOGIN_CLIENT_ID") {
        config.client_id = v;
    }
    if let Some(v) = non_empty_env("AZLOGIN_AUTHORITY_URL") {
        config.authority_url = v;
    }
    if let Some(v) = non_empty_env("AZLOGIN_TENANTS_URL") {
        config.tenants_url = v;
    }
    if let Some(v) = non_empty_env("AZLOGIN_TOKEN_FILE") {
        config.token_file = Some(PathBuf::from(v));
    }
}
