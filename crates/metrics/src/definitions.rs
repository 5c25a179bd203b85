//! Metric name definitions.
//!
//! All names live here so dashboards have a single place to look.

/// Login and token lifecycle metrics
pub mod auth {
    /// Total interactive login attempts
    pub const LOGIN_ATTEMPTS_TOTAL: &str = "azlogin_auth_login_attempts_total";
    /// Successful logins
    pub const LOGIN_SUCCESS_TOTAL: &str = "azlogin_auth_login_success_total";
    /// Failed logins (cancellations are not counted)
    pub const LOGIN_FAILURES_TOTAL: &str = "azlogin_auth_login_failures_total";
    /// Stored access token was still valid
    pub const TOKEN_CACHE_HITS_TOTAL: &str = "azlogin_auth_token_cache_hits_total";
    /// Refresh requests sent for an expired access token
    pub const TOKEN_REFRESH_TOTAL: &str = "azlogin_auth_token_refresh_total";
    /// Refresh requests the provider rejected or that failed in transit
    pub const TOKEN_REFRESH_FAILURES_TOTAL: &str = "azlogin_auth_token_refresh_failures_total";
}
