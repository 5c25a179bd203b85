//! Azure browser login with persisted, self-refreshing tokens.
//!
//! [`LoginService::login`] runs the authorization-code flow through a local
//! callback listener and stores a tenant-bound credential.
//! [`LoginService::get_valid_token`] hands that token out, refreshing it once
//! it has expired.

pub mod browser;
pub mod callback_server;
pub mod clock;
mod config_dir;
pub mod defaults;
pub mod error;
pub mod flow;
pub mod provider;
pub mod storage;
pub mod types;

pub use {
    browser::{BrowserOpener, SystemBrowser},
    callback_server::{CallbackParams, CallbackServer, ListenerState, PendingLogin},
    clock::{Clock, SystemClock},
    defaults::load_login_config,
    error::{Error, Result},
    flow::LoginService,
    provider::AzureClient,
    storage::TokenStore,
    types::{LoginConfig, LoginInfo, LoginOutcome, OAuthToken, ProviderToken},
};
