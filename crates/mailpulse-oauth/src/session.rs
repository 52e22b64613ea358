//! Token session shared by everything that talks to the remote service.
//!
//! The application root constructs one `AuthSession` and hands an `Arc` of it
//! to the remote backend. The cache file is read lazily on first use and
//! rewritten after every login or refresh, so a signed-in user survives
//! restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flow::{AuthorizationCodeFlow, LoopbackListener, OAuthClient};
use crate::token::Token;

/// How long interactive login waits for the browser redirect.
const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct Cache {
    loaded: bool,
    token: Option<Token>,
}

/// Explicitly constructed auth session backed by a token cache file.
#[derive(Debug)]
pub struct AuthSession {
    client: OAuthClient,
    cache_path: PathBuf,
    login_timeout: Duration,
    cache: Mutex<Cache>,
}

impl AuthSession {
    /// Creates a session. Nothing is read from disk until first use.
    #[must_use]
    pub fn new(client: OAuthClient, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_path: cache_path.into(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Sets how long interactive login waits for the redirect.
    #[must_use]
    pub const fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Path of the token cache file.
    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Returns a usable access token without user interaction.
    ///
    /// A valid cached token is returned as is; an expired one is refreshed
    /// and persisted. Returns `None` when nobody is signed in, when the
    /// refresh token was rejected, or when the token endpoint is unreachable,
    /// so routine polling degrades quietly while offline.
    pub async fn acquire_token_silent(&self) -> Option<String> {
        let mut cache = self.cache.lock().await;
        self.ensure_loaded(&mut cache).await;

        let token = cache.token.as_ref()?;
        if token.is_valid() {
            return Some(token.access_token.clone());
        }

        match self.client.refresh(token).await {
            Ok(fresh) => {
                debug!("Access token refreshed");
                let access = fresh.access_token.clone();
                if let Err(e) = self.persist(&fresh).await {
                    warn!("Failed to write token cache: {e}");
                }
                cache.token = Some(fresh);
                Some(access)
            }
            Err(e) if e.is_connectivity() => {
                debug!("Token refresh skipped, identity endpoint unreachable: {e}");
                None
            }
            Err(e) if e.ends_session() => {
                warn!("Cached sign-in is no longer valid, clearing it: {e}");
                cache.token = None;
                self.remove_cache_file().await;
                None
            }
            Err(e) => {
                warn!("Token refresh failed: {e}");
                None
            }
        }
    }

    /// Runs browser-based sign-in and stores the resulting token.
    ///
    /// Only call this for a user-initiated connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound, the user declines,
    /// the redirect does not arrive in time, or the code exchange fails.
    pub async fn login_interactive(&self) -> Result<Token> {
        let port = self
            .client
            .redirect_uri
            .as_deref()
            .and_then(redirect_port)
            .unwrap_or(0);
        let listener = LoopbackListener::bind(port).await?;
        let flow = AuthorizationCodeFlow::new(self.client.clone())
            .with_redirect_uri(listener.redirect_uri());

        let login_hint = self.account().await;
        let request = flow.authorization_request(login_hint.as_deref())?;

        info!("Opening browser for sign-in");
        if let Err(e) = opener::open(request.url.as_str()) {
            warn!("Failed to open browser ({e}); visit {} to sign in", request.url);
        }

        let code = listener
            .wait_for_redirect(self.login_timeout)
            .await?
            .into_code(&request.state)?;
        let mut token = flow.exchange_code(&code).await?;
        token.account = login_hint;

        self.persist(&token).await?;
        let mut cache = self.cache.lock().await;
        cache.loaded = true;
        cache.token = Some(token.clone());
        info!("Sign-in complete");
        Ok(token)
    }

    /// Forgets the signed-in user and deletes the cache file.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file exists but cannot be removed.
    pub async fn logout(&self) -> Result<()> {
        let mut cache = self.cache.lock().await;
        cache.loaded = true;
        cache.token = None;
        match tokio::fs::remove_file(&self.cache_path).await {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if a token (valid or refreshable) is cached.
    pub async fn is_signed_in(&self) -> bool {
        let mut cache = self.cache.lock().await;
        self.ensure_loaded(&mut cache).await;
        cache.token.is_some()
    }

    /// The signed-in user recorded with the token, if known.
    pub async fn account(&self) -> Option<String> {
        let mut cache = self.cache.lock().await;
        self.ensure_loaded(&mut cache).await;
        cache.token.as_ref().and_then(|t| t.account.clone())
    }

    /// Records the signed-in user's address alongside the token.
    pub async fn set_account(&self, account: &str) {
        let mut cache = self.cache.lock().await;
        self.ensure_loaded(&mut cache).await;
        let Some(token) = cache.token.as_mut() else {
            return;
        };
        if token.account.as_deref() == Some(account) {
            return;
        }
        token.account = Some(account.to_string());
        let snapshot = token.clone();
        if let Err(e) = self.persist(&snapshot).await {
            warn!("Failed to write token cache: {e}");
        }
    }

    /// Seeds the session with a token, replacing any cached one.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file cannot be written.
    pub async fn store(&self, token: Token) -> Result<()> {
        self.persist(&token).await?;
        let mut cache = self.cache.lock().await;
        cache.loaded = true;
        cache.token = Some(token);
        Ok(())
    }

    async fn ensure_loaded(&self, cache: &mut Cache) {
        if cache.loaded {
            return;
        }
        cache.loaded = true;
        cache.token = match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(content) => match serde_json::from_str::<Token>(&content) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!("Ignoring unreadable token cache {:?}: {e}", self.cache_path);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read token cache {:?}: {e}", self.cache_path);
                None
            }
        };
    }

    async fn persist(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.cache_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.cache_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.cache_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }

    async fn remove_cache_file(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.cache_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to delete token cache: {e}");
        }
    }
}

fn redirect_port(uri: &str) -> Option<u16> {
    url::Url::parse(uri).ok()?.port()
}
