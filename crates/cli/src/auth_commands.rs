use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Result,
    azlogin_oauth::{BrowserOpener, LoginOutcome, LoginService, SystemBrowser, load_login_config},
    clap::Subcommand,
    tokio_util::sync::CancellationToken,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in through the browser and store the credential.
    Login {
        /// Give up waiting for the browser after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print a valid access token, refreshing it if it has expired.
    Token {
        /// Print the full `Authorization` header value instead.
        #[arg(long)]
        header: bool,
    },
    /// Show the stored login without contacting the provider.
    Status,
}

pub async fn handle_auth(action: AuthAction, token_file: Option<PathBuf>) -> Result<()> {
    let mut config = load_login_config()?;
    if token_file.is_some() {
        config.token_file = token_file;
    }
    let service = LoginService::new(config).with_browser(Arc::new(TerminalBrowser));

    match action {
        AuthAction::Login { timeout } => login(&service, timeout).await,
        AuthAction::Token { header } => token(&service, header).await,
        AuthAction::Status => status(&service),
    }
}

/// System browser that tells the user what is happening.
struct TerminalBrowser;

impl BrowserOpener for TerminalBrowser {
    fn open(&self, url: &str) -> Result<()> {
        println!("Opening browser for authentication...");
        SystemBrowser.open(url).inspect_err(|_| {
            eprintln!("Could not open browser. Login URL:\n{url}");
        })
    }
}

async fn login(service: &LoginService, timeout: Option<u64>) -> Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match timeout {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    () = tokio::time::sleep(Duration::from_secs(secs)) => {},
                }
            },
            None => {
                let _ = tokio::signal::ctrl_c().await;
            },
        }
        trigger.cancel();
    });

    match service.login(&cancel).await? {
        LoginOutcome::Succeeded { .. } => println!("Login Succeeded"),
        LoginOutcome::Cancelled => println!("Login cancelled"),
    }
    Ok(())
}

async fn token(service: &LoginService, header: bool) -> Result<()> {
    let token = match service.get_valid_token().await {
        Ok(token) => token,
        Err(e) if e.requires_login() => {
            return Err(anyhow::Error::new(e).context("run `azlogin login` first"));
        },
        Err(e) => return Err(e.into()),
    };
    if header {
        println!("{}", token.authorization_header());
    } else {
        println!("{}", token.access_token);
    }
    Ok(())
}

fn status(service: &LoginService) -> Result<()> {
    let info = match service.store().read() {
        Ok(info) => info,
        Err(e) if e.is_not_logged_in() => {
            println!("Not logged in.");
            return Ok(());
        },
        Err(e) => return Err(e.into()),
    };

    let remaining = info.token.expiry - chrono::Utc::now();
    let expiry = if remaining > chrono::Duration::zero() {
        let hours = remaining.num_hours();
        let mins = remaining.num_minutes() % 60;
        format!("valid ({hours}h {mins}m remaining)")
    } else {
        "expired (refreshed on next use)".to_string()
    };
    println!("tenant {} [{expiry}]", info.tenant_id);
    println!("credential file: {}", service.store().path().display());
    Ok(())
}
