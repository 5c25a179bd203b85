use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    reqwest::StatusCode,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    types::{LoginConfig, OAuthToken, ProviderToken, TenantListing},
};

/// Client for the Azure token endpoint and the tenant listing API.
#[derive(Debug, Clone)]
pub struct AzureClient {
    http: reqwest::Client,
    config: Arc<LoginConfig>,
}

impl AzureClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: Arc<LoginConfig>) -> Self {
        Self { http, config }
    }

    #[must_use]
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// POST `form` to the token endpoint of `tenant`.
    pub async fn query_token(&self, form: &[(&str, &str)], tenant: &str) -> Result<ProviderToken> {
        let url = self.config.token_endpoint(tenant);
        debug!(%tenant, "requesting token");

        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(%tenant, %status, "token endpoint rejected request");
            return Err(Error::auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        serde_json::from_str(&body).map_err(|e| Error::Auth {
            message: "token endpoint returned a malformed body".into(),
            source: Some(Box::new(e)),
        })
    }

    /// Exchange an authorization code against the generic tenant.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken> {
        let scope = self.config.scope();
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("scope", scope.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        self.query_token(&form, &self.config.default_tenant).await
    }

    /// Redeem a refresh token against `tenant`, anchoring expiry at `now`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        tenant: &str,
        now: DateTime<Utc>,
    ) -> Result<OAuthToken> {
        let scope = self.config.scope();
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.query_token(&form, tenant).await?.into_token(now)
    }

    /// Tenant ids visible to the bearer of `access_token`, in provider order.
    pub async fn list_tenants(&self, access_token: &str) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(&self.config.tenants_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status != StatusCode::OK {
            warn!(%status, "tenant listing rejected request");
            return Err(Error::auth(format!(
                "tenant listing returned {status}: {body}"
            )));
        }

        let listing: TenantListing = serde_json::from_str(&body).map_err(Error::Parse)?;
        Ok(listing.value.into_iter().map(|t| t.tenant_id).collect())
    }
}
