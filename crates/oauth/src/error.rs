use std::path::PathBuf;

/// Errors produced by the login flow, the identity provider client and the
/// credential store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No local port could be bound for the OAuth callback.
    #[error("could not start local callback listener")]
    Bind(#[source] std::io::Error),

    /// The browser could not be opened on the authorization URL.
    #[error("could not open browser")]
    Browser(#[source] anyhow::Error),

    /// The interactive flow produced an unusable result.
    #[error("login failed: {message}")]
    LoginFailed {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The identity provider rejected a token exchange or refresh.
    #[error("{message}")]
    Auth {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A tenant listing body is not the expected JSON.
    #[error("could not parse response body")]
    Parse(#[source] serde_json::Error),

    /// The stored login record could not be decoded or encoded.
    #[error("invalid credential record at {}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No credential has been stored yet.
    #[error("not logged in (no credential at {})", path.display())]
    NotFound { path: PathBuf },

    #[error("credential store error at {}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request to identity provider failed")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("invalid endpoint URL")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn login_failed(message: impl Into<String>) -> Self {
        Self::LoginFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap this error as a login failure, keeping it as the source.
    #[must_use]
    pub fn into_login_failed(self, message: impl Into<String>) -> Self {
        Self::LoginFailed {
            message: message.into(),
            source: Some(Box::new(self)),
        }
    }

    /// Wrap this error as an authentication failure, keeping it as the source.
    #[must_use]
    pub fn into_auth(self, message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            source: Some(Box::new(self)),
        }
    }

    /// True when no credential is stored.
    #[must_use]
    pub fn is_not_logged_in(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the user has to run an interactive login to recover.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_failed_keeps_source_chain() {
        let inner = Error::auth("token endpoint returned 400");
        let err = inner.into_login_failed("tenant refresh failed");
        assert_eq!(err.to_string(), "login failed: tenant refresh failed");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "token endpoint returned 400");
    }

    #[test]
    fn requires_login_for_missing_and_rejected() {
        let missing = Error::NotFound {
            path: PathBuf::from("/tmp/none.json"),
        };
        assert!(missing.is_not_logged_in());
        assert!(missing.requires_login());
        assert!(Error::auth("expired refresh token").requires_login());
        assert!(!Error::login_failed("access_denied").requires_login());
    }
}
