//! `MailPulse` - headless poller over the desktop mail client and Microsoft Graph.
//!
//! Loads settings, builds one auth session and both backends, then logs the
//! merged inbox, new mail and pulse status on every tick.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use mailpulse_core::{
    EnabledAccounts, HybridClient, InboxQuery, LocalBackend, RemoteBackend, RemoteSettings,
    Settings,
};
use mailpulse_oauth::{AuthSession, OAuthClient, Provider};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Poll,
    Once,
    Login,
    Logout,
}

fn parse_args() -> Result<Mode> {
    let mut mode = Mode::Poll;
    for arg in std::env::args().skip(1) {
        mode = match arg.as_str() {
            "--once" => Mode::Once,
            "--login" => Mode::Login,
            "--logout" => Mode::Logout,
            other => bail!("unknown argument {other:?} (expected --login, --logout or --once)"),
        };
    }
    Ok(mode)
}

fn auth_session(remote: &RemoteSettings) -> Result<Arc<AuthSession>> {
    let provider = Provider::microsoft(&remote.tenant)?;
    let mut client = OAuthClient::new(remote.client_id.clone(), provider);
    if remote.redirect_port != 0 {
        client = client.with_redirect_uri(format!("http://localhost:{}", remote.redirect_port));
    }
    Ok(Arc::new(AuthSession::new(client, Settings::token_cache_path())))
}

/// `None` when no accounts are configured, which means every account.
fn account_filter(settings: &Settings) -> Option<&EnabledAccounts> {
    (!settings.accounts.is_empty()).then_some(&settings.accounts)
}

async fn poll(client: &mut HybridClient, settings: &Settings) {
    let accounts = account_filter(settings);

    for message in client.check_new_mail(accounts).await {
        info!(
            account = %message.account,
            from = %message.sender_name,
            subject = %message.subject,
            "New mail"
        );
    }

    let mut query = InboxQuery::new(settings.inbox_count);
    if let Some(accounts) = accounts {
        query = query.with_accounts(accounts.clone());
    }
    if settings.only_flagged {
        query = query.flagged(&settings.reminder_filters);
    }
    let page = client.get_inbox_items(&query).await;
    let pulse = client.get_pulse_status(accounts, &settings.task_filters).await;

    info!(
        shown = page.items.len(),
        unread = page.unread,
        calendar = pulse.calendar.as_deref().unwrap_or("-"),
        tasks = pulse.tasks.as_deref().unwrap_or("-"),
        "Pulse"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailpulse=info,mailpulse_core=info,mailpulse_oauth=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = parse_args()?;
    let path = Settings::default_path();
    let settings = Settings::load(&path)
        .await
        .with_context(|| format!("loading settings from {}", path.display()))?;

    let session = auth_session(&settings.remote)?;
    let mut remote = RemoteBackend::new(&settings.remote, Arc::clone(&session))?;

    match mode {
        Mode::Login => {
            if settings.remote.client_id.is_empty() {
                bail!("remote.client_id is not set in {}", path.display());
            }
            let connected = remote.login().await?;
            info!(
                connected,
                account = remote.account().unwrap_or("unknown"),
                "Signed in"
            );
            return Ok(());
        }
        Mode::Logout => {
            session.logout().await?;
            return Ok(());
        }
        Mode::Poll | Mode::Once => {}
    }

    info!("Starting MailPulse");
    if settings.remote.client_id.is_empty() {
        warn!("remote.client_id is not set, the remote backend stays signed out");
    }

    let mut client = HybridClient::new(Box::new(LocalBackend::desktop()), Box::new(remote));
    if !client.connect().await {
        warn!("No backend is available yet, polling anyway");
    }

    if mode == Mode::Once {
        poll(&mut client, &settings).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(settings.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                client.reconnect_missing().await;
                poll(&mut client, &settings).await;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }
    Ok(())
}
