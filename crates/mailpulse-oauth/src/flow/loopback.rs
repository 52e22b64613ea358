//! Loopback redirect capture for desktop sign-in.
//!
//! The browser is sent to `http://localhost:<port>/?code=...&state=...` after
//! consent. We accept exactly one connection, pull the query out of the
//! request line, and answer with a short page telling the user to go back.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Echoed `state`.
    pub state: Option<String>,
    /// Error code when consent failed.
    pub error: Option<String>,
    /// Error description when consent failed.
    pub error_description: Option<String>,
}

impl RedirectParams {
    /// Parses the request target of the redirect (`/?code=...`).
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not a valid path and query.
    pub fn from_request_target(target: &str) -> Result<Self> {
        let url = Url::parse("http://localhost")?.join(target)?;
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Ok(params)
    }

    /// Validates the redirect against the `state` we sent and returns the code.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` when the user declined, `StateMismatch` when the
    /// state differs, and `InvalidResponse` when no code was delivered.
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(if error == "access_denied" {
                Error::AccessDenied
            } else {
                Error::rejected(error, self.error_description.unwrap_or_default())
            });
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::StateMismatch);
        }
        self.code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidResponse("redirect carried no code".into()))
    }
}

/// One-shot HTTP listener on the loopback interface.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Binds `127.0.0.1:<port>`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    /// Redirect URI to register with the authorization request.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Waits for the browser redirect.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if nothing arrives in time, or an I/O error.
    pub async fn wait_for_redirect(self, timeout: Duration) -> Result<RedirectParams> {
        tokio::time::timeout(timeout, self.accept_one())
            .await
            .map_err(|_| Error::LoginTimeout(timeout))?
    }

    async fn accept_one(self) -> Result<RedirectParams> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Redirect connection from {peer}");

        let (reader, mut writer) = stream.into_split();
        let mut request_line = String::new();
        BufReader::new(reader).read_line(&mut request_line).await?;

        // GET /?code=...&state=... HTTP/1.1
        let target = request_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| Error::InvalidResponse("malformed redirect request".into()))?;
        let params = RedirectParams::from_request_target(target)?;

        let message = if params.error.is_some() {
            "Sign-in was not completed. You can close this tab."
        } else {
            "Signed in. You can close this tab and return to mailpulse."
        };
        let body = format!(
            "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
             <h2>{message}</h2></body></html>"
        );
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        // The browser page is cosmetic; a failed write must not fail sign-in.
        if let Err(e) = writer.write_all(response.as_bytes()).await {
            debug!("Failed to answer redirect: {e}");
        }
        let _ = writer.shutdown().await;

        Ok(params)
    }
}
