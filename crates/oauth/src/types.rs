use {
    chrono::{DateTime, Duration, Utc},
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

/// Identity provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub client_id: String,
    /// Base URL of the authority, without a tenant segment.
    pub authority_url: String,
    /// Tenant listing API, including its `api-version` query.
    pub tenants_url: String,
    pub scopes: Vec<String>,
    /// Tenant used for the authorize call and the initial code exchange.
    pub default_tenant: String,
    /// Path served by the local callback listener.
    pub callback_path: String,
    /// Overrides the platform default credential file.
    pub token_file: Option<std::path::PathBuf>,
}

impl LoginConfig {
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_url.trim_end_matches('/'),
            self.default_tenant
        )
    }

    #[must_use]
    pub fn token_endpoint(&self, tenant: &str) -> String {
        format!(
            "{}/{tenant}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/')
        )
    }

    /// Scopes joined the way the token endpoint expects them.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Token as stored on disk and handed to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

impl OAuthToken {
    /// A token is usable while it has an access token and `now` is strictly
    /// before its expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expiry > now
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        let kind = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{kind} {}", self.access_token)
    }
}

/// Persisted login record: the tenant the token is bound to, and the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub token: OAuthToken,
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToken {
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    pub expires_in: i64,
    #[serde(default)]
    pub ext_expires_in: i64,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Family-of-client-ids marker.
    #[serde(default)]
    pub foci: Option<String>,
}

impl ProviderToken {
    /// Convert to a stored token, anchoring the relative lifetime at `now`.
    ///
    /// A negative `expires_in` yields a token that is already expired. A
    /// lifetime past the representable date range is an [`Error::Auth`].
    pub fn into_token(self, now: DateTime<Utc>) -> Result<OAuthToken> {
        let expiry = Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| Error::auth("token endpoint returned an out-of-range expires_in"))?;
        Ok(OAuthToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expiry,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TenantListing {
    pub value: Vec<TenantValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TenantValue {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
}

/// How an interactive login ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Succeeded { tenant_id: String },
    /// The caller cancelled before the browser redirect arrived.
    Cancelled,
}
