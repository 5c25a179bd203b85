use std::{
    collections::HashMap,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::StatusCode,
        response::{Html, IntoResponse, Response},
        routing::get,
    },
    tokio::{
        net::TcpListener,
        sync::{Mutex, oneshot, watch},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>azlogin</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Login complete</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>azlogin</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Login failed</h2>
<p>Return to the terminal for details.</p>
</body>
</html>"#;

/// Query parameters carried by the provider redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.get("code")
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.get("error")
    }

    #[must_use]
    pub fn error_description(&self) -> Option<&str> {
        self.get("error_description")
    }
}

impl From<HashMap<String, String>> for CallbackParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Lifecycle of a single-use callback listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Delivered,
    Cancelled,
}

struct CallbackSlot {
    sender: Mutex<Option<oneshot::Sender<CallbackParams>>>,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: CancellationToken,
}

/// Ephemeral local HTTP endpoint receiving the OAuth redirect.
pub struct CallbackServer;

impl CallbackServer {
    /// Bind an OS-assigned port on the loopback interface and start serving
    /// `callback_path` in the background.
    ///
    /// Returns the redirect URI to register with the authorization request and
    /// the handle that resolves once the redirect arrives.
    pub async fn start(callback_path: &str) -> Result<(String, PendingLogin)> {
        let path = if callback_path.starts_with('/') {
            callback_path.to_string()
        } else {
            format!("/{callback_path}")
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;

        // `localhost` may resolve to ::1 first, so take the same port there too.
        let listener_v6 = match TcpListener::bind((Ipv6Addr::LOCALHOST, local_addr.port())).await {
            Ok(l) => Some(l),
            Err(e) => {
                debug!(error = %e, "IPv6 loopback unavailable for callback listener");
                None
            },
        };
        let mut loopback_addrs = vec![local_addr];
        if let Some(addr) = listener_v6.as_ref().and_then(|l| l.local_addr().ok()) {
            loopback_addrs.push(addr);
        }

        let (tx, rx) = oneshot::channel();
        let (state, _) = watch::channel(ListenerState::Idle);
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();
        let slot = Arc::new(CallbackSlot {
            sender: Mutex::new(Some(tx)),
            state: Arc::clone(&state),
            shutdown: shutdown.clone(),
        });

        let app = Router::new()
            .route(&path, get(handle_callback))
            .with_state(slot);

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let v4 = serve_until(listener, app.clone(), signal.clone());
            if let Some(listener_v6) = listener_v6 {
                tokio::join!(v4, serve_until(listener_v6, app, signal));
            } else {
                v4.await;
            }
        });
        state.send_replace(ListenerState::Listening);
        debug!(port = local_addr.port(), %path, "callback listener started");

        let redirect_uri = if path == "/" {
            format!("http://localhost:{}", local_addr.port())
        } else {
            format!("http://localhost:{}{path}", local_addr.port())
        };

        Ok((redirect_uri, PendingLogin {
            receiver: Some(rx),
            state,
            shutdown,
            task,
            loopback_addrs,
        }))
    }
}

async fn serve_until(listener: TcpListener, app: Router, signal: CancellationToken) {
    let serve = axum::serve(listener, app).with_graceful_shutdown(signal.cancelled_owned());
    if let Err(e) = serve.await {
        warn!(error = %e, "callback listener stopped with error");
    }
}

async fn handle_callback(
    State(slot): State<Arc<CallbackSlot>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(sender) = slot.sender.lock().await.take() else {
        warn!("ignoring repeated OAuth callback");
        return (StatusCode::GONE, "login callback already handled").into_response();
    };

    let params = CallbackParams::from(query);
    let page = if params.error().is_some() {
        FAILURE_PAGE
    } else {
        SUCCESS_PAGE
    };

    if sender.send(params).is_ok() {
        slot.state.send_if_modified(|s| transition(s, ListenerState::Delivered));
        debug!("OAuth callback delivered");
    } else {
        debug!("OAuth callback arrived after the login was abandoned");
    }
    slot.shutdown.cancel();

    Html(page).into_response()
}

/// Only a listening server can move to a terminal state.
fn transition(current: &mut ListenerState, next: ListenerState) -> bool {
    if *current == ListenerState::Listening {
        *current = next;
        true
    } else {
        false
    }
}

/// Pending redirect for one login attempt.
///
/// Dropping it stops the listener and releases the port.
pub struct PendingLogin {
    receiver: Option<oneshot::Receiver<CallbackParams>>,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    loopback_addrs: Vec<SocketAddr>,
}

impl PendingLogin {
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// The IPv4 loopback address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.loopback_addrs[0]
    }

    /// Every loopback address serving the callback. The IPv6 one is present
    /// when the host supports it, on the same port.
    #[must_use]
    pub fn loopback_addrs(&self) -> &[SocketAddr] {
        &self.loopback_addrs
    }

    /// Wait for the redirect, or for `cancel`.
    ///
    /// `Ok(None)` means the wait was cancelled. The listener is told to shut
    /// down either way.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<Option<CallbackParams>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(Error::login_failed("login callback already consumed"));
        };
        let received = tokio::select! {
            () = cancel.cancelled() => None,
            received = receiver => Some(received),
        };
        self.shutdown.cancel();

        match received {
            None => {
                self.state
                    .send_if_modified(|s| transition(s, ListenerState::Cancelled));
                Ok(None)
            },
            Some(received) => {
                self.receiver = None;
                received.map(Some).map_err(|_| {
                    Error::login_failed("callback listener stopped before a redirect arrived")
                })
            },
        }
    }

    /// Stop the listener and wait until the port is released.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PendingLogin {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_url(pending: &PendingLogin, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", pending.local_addr())
    }

    #[tokio::test]
    async fn redirect_uri_points_at_bound_port() {
        let (redirect_uri, pending) = CallbackServer::start("/").await.unwrap();
        assert_eq!(
            redirect_uri,
            format!("http://localhost:{}", pending.local_addr().port())
        );
        assert_eq!(pending.state(), ListenerState::Listening);

        let (with_path, other) = CallbackServer::start("auth/callback").await.unwrap();
        assert_eq!(
            with_path,
            format!("http://localhost:{}/auth/callback", other.local_addr().port())
        );
    }

    #[tokio::test]
    async fn delivers_first_request_only() {
        let (_, mut pending) = CallbackServer::start("/").await.unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .get(loopback_url(&pending, "/?code=abc&state=xyz"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("Login complete"));

        let params = pending
            .wait(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.code(), Some("abc"));
        assert_eq!(params.state(), Some("xyz"));
        assert_eq!(pending.state(), ListenerState::Delivered);

        // Either refused by the handler or by a closed listener.
        if let Ok(second) = client
            .get(loopback_url(&pending, "/?code=again"))
            .send()
            .await
        {
            assert_eq!(second.status(), 410);
        }
        assert_eq!(pending.state(), ListenerState::Delivered);
    }

    #[tokio::test]
    async fn error_redirect_is_delivered_with_failure_page() {
        let (_, mut pending) = CallbackServer::start("/").await.unwrap();
        let resp = reqwest::get(loopback_url(
            &pending,
            "/?error=access_denied&error_description=user+declined",
        ))
        .await
        .unwrap();
        assert!(resp.text().await.unwrap().contains("Login failed"));

        let params = pending
            .wait(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.error(), Some("access_denied"));
        assert_eq!(params.error_description(), Some("user declined"));
        assert_eq!(params.code(), None);
    }

    #[tokio::test]
    async fn other_paths_do_not_consume_the_slot() {
        let (_, mut pending) = CallbackServer::start("/callback").await.unwrap();
        let client = reqwest::Client::new();

        let miss = client
            .get(loopback_url(&pending, "/favicon.ico"))
            .send()
            .await
            .unwrap();
        assert_eq!(miss.status(), 404);
        assert_eq!(pending.state(), ListenerState::Listening);

        client
            .get(loopback_url(&pending, "/callback?code=c1&state=s1"))
            .send()
            .await
            .unwrap();
        let params = pending
            .wait(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.code(), Some("c1"));
    }

    #[tokio::test]
    async fn cancellation_releases_the_port() {
        let (_, mut pending) = CallbackServer::start("/").await.unwrap();
        let url = loopback_url(&pending, "/?code=late");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pending.wait(&cancel).await.unwrap().is_none());
        assert_eq!(pending.state(), ListenerState::Cancelled);

        let addrs = pending.loopback_addrs().to_vec();
        pending.close().await;
        assert!(reqwest::get(url).await.is_err());
        for addr in addrs {
            assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        }
    }

    #[tokio::test]
    async fn ipv6_loopback_shares_the_port() {
        let (redirect_uri, mut pending) = CallbackServer::start("/").await.unwrap();
        let port = pending.local_addr().port();
        assert!(redirect_uri.ends_with(&format!(":{port}")));

        let Some(v6) = pending.loopback_addrs().iter().copied().find(SocketAddr::is_ipv6) else {
            // Host without IPv6 loopback.
            return;
        };
        assert_eq!(v6.port(), port);

        let resp = reqwest::get(format!("http://{v6}/?code=over-v6&state=s"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let params = pending
            .wait(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.code(), Some("over-v6"));
    }
}
