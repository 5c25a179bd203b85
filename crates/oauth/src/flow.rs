use std::sync::Arc;

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use azlogin_metrics::{auth as auth_metrics, counter};

use crate::{
    browser::{BrowserOpener, SystemBrowser},
    callback_server::{CallbackParams, CallbackServer},
    clock::{Clock, SystemClock},
    defaults::load_login_config,
    error::{Error, Result},
    provider::AzureClient,
    storage::TokenStore,
    types::{LoginConfig, LoginInfo, LoginOutcome, OAuthToken},
};

/// Browser login and token lifecycle for a single stored identity.
pub struct LoginService {
    config: Arc<LoginConfig>,
    client: AzureClient,
    store: TokenStore,
    browser: Arc<dyn BrowserOpener>,
    clock: Arc<dyn Clock>,
}

impl LoginService {
    #[must_use]
    pub fn new(config: LoginConfig) -> Self {
        let store = match &config.token_file {
            Some(path) => TokenStore::with_path(path),
            None => TokenStore::new(),
        };
        let config = Arc::new(config);
        Self {
            client: AzureClient::new(reqwest::Client::new(), Arc::clone(&config)),
            config,
            store,
            browser: Arc::new(SystemBrowser),
            clock: Arc::new(SystemClock),
        }
    }

    /// Service built from `login.toml` and `AZLOGIN_*` overrides.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(load_login_config()?))
    }

    #[must_use]
    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = browser;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Authorization request URL sent to the browser.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let scope = self.config.scope();
        let url = Url::parse_with_params(&self.config.authorize_endpoint(), [
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("state", state),
            ("prompt", "select_account"),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
        ])?;
        Ok(url)
    }

    /// Run the interactive browser login and persist the resulting credential.
    ///
    /// Cancelling `cancel` while waiting for the redirect ends the attempt with
    /// [`LoginOutcome::Cancelled`]. Requests already sent to the provider are
    /// left to finish. A failed attempt never touches the stored credential.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<LoginOutcome> {
        #[cfg(feature = "metrics")]
        counter!(auth_metrics::LOGIN_ATTEMPTS_TOTAL).increment(1);

        let result = self.run_login(cancel).await;

        match &result {
            Ok(LoginOutcome::Succeeded { tenant_id }) => {
                #[cfg(feature = "metrics")]
                counter!(auth_metrics::LOGIN_SUCCESS_TOTAL).increment(1);
                info!(%tenant_id, "login succeeded");
            },
            Ok(LoginOutcome::Cancelled) => info!("login cancelled"),
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(auth_metrics::LOGIN_FAILURES_TOTAL).increment(1);
                warn!(error = %e, "login failed");
            },
        }
        result
    }

    async fn run_login(&self, cancel: &CancellationToken) -> Result<LoginOutcome> {
        let (redirect_uri, mut pending) = CallbackServer::start(&self.config.callback_path).await?;
        let state = uuid::Uuid::new_v4().to_string();
        let url = self.authorize_url(&redirect_uri, &state)?;

        self.browser.open(url.as_str()).map_err(Error::Browser)?;
        debug!(%redirect_uri, "waiting for browser redirect");

        let Some(params) = pending.wait(cancel).await? else {
            return Ok(LoginOutcome::Cancelled);
        };
        drop(pending);

        let tenant_id = self.complete_login(&params, &state, &redirect_uri).await?;
        Ok(LoginOutcome::Succeeded { tenant_id })
    }

    async fn complete_login(
        &self,
        params: &CallbackParams,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        if let Some(error) = params.error() {
            let message = match params.error_description() {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(Error::login_failed(message));
        }
        if params.state() != Some(state) {
            return Err(Error::login_failed("state mismatch in login redirect"));
        }
        let Some(code) = params.code() else {
            return Err(Error::login_failed(
                "login redirect did not carry an authorization code",
            ));
        };

        let token = self
            .client
            .exchange_code(code, redirect_uri)
            .await
            .map_err(|e| e.into_auth("access token request failed"))?;

        let tenants = self
            .client
            .list_tenants(&token.access_token)
            .await
            .map_err(|e| e.into_login_failed("could not list tenants"))?;
        // First tenant only; there is no tenant picker.
        let Some(tenant_id) = tenants.into_iter().next() else {
            return Err(Error::login_failed("no tenant found for this account"));
        };
        debug!(%tenant_id, "binding token to tenant");

        let tenant_token = self
            .client
            .refresh(&token.refresh_token, &tenant_id, self.clock.now())
            .await
            .map_err(|e| e.into_login_failed("could not obtain a tenant token"))?;

        self.store
            .write(&LoginInfo {
                tenant_id: tenant_id.clone(),
                token: tenant_token,
            })
            .map_err(|e| e.into_login_failed("could not save credential"))?;

        Ok(tenant_id)
    }

    /// Stored access token, refreshed first if it has expired.
    ///
    /// A refresh failure is returned as [`Error::Auth`] and leaves the stored
    /// credential as it was.
    pub async fn get_valid_token(&self) -> Result<OAuthToken> {
        let info = self.store.read()?;
        let now = self.clock.now();
        if info.token.is_valid_at(now) {
            #[cfg(feature = "metrics")]
            counter!(auth_metrics::TOKEN_CACHE_HITS_TOTAL).increment(1);
            debug!(expiry = %info.token.expiry, "stored access token still valid");
            return Ok(info.token);
        }

        #[cfg(feature = "metrics")]
        counter!(auth_metrics::TOKEN_REFRESH_TOTAL).increment(1);
        let token = match self
            .client
            .refresh(&info.token.refresh_token, &info.tenant_id, now)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(auth_metrics::TOKEN_REFRESH_FAILURES_TOTAL).increment(1);
                return Err(
                    e.into_auth("access token request failed; you may need to log in again")
                );
            },
        };

        self.store.write(&LoginInfo {
            tenant_id: info.tenant_id.clone(),
            token: token.clone(),
        })?;
        info!(tenant_id = %info.tenant_id, expiry = %token.expiry, "access token refreshed");
        Ok(token)
    }

    /// `Authorization` header value for API clients.
    pub async fn authorization_header(&self) -> Result<String> {
        Ok(self.get_valid_token().await?.authorization_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_fixed_parameters_in_order() {
        let service = LoginService::new(LoginConfig::default());
        let url = service
            .authorize_url("http://localhost:40123", "opaque-state")
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize\
             ?response_type=code\
             &client_id=04b07795-8ddb-461a-bbee-02f9e1bf7b46\
             &redirect_uri=http%3A%2F%2Flocalhost%3A40123\
             &state=opaque-state\
             &prompt=select_account\
             &response_mode=query\
             &scope=offline_access+https%3A%2F%2Fmanagement.azure.com%2F.default"
        );
    }

    #[test]
    fn token_file_from_config_selects_store_path() {
        let config = LoginConfig {
            token_file: Some("/tmp/azlogin-test/token.json".into()),
            ..LoginConfig::default()
        };
        let service = LoginService::new(config);
        assert_eq!(
            service.store().path(),
            std::path::Path::new("/tmp/azlogin-test/token.json")
        );
    }
}
