//! Purpose: Access-token parsing and the background credential refresher.
//! Exports: `TokenClaims`, `AccessToken`, `TokenManager`, `parse_claims`.
//! Role: One actor task owns the credential; callers wait on a watch channel for a usable token.
//! Invariants: `iat >= exp` is a parse error; a ttl is never negative or zero.
//! Invariants: Readers never receive an expired token; they wait or fail with `NotAuthenticated`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::classify::Classifier;
use crate::core::config::{ClientConfig, Credentials};
use crate::core::envelope::AuthRequest;
use crate::core::error::{Error, ErrorKind};
use crate::core::transport::ProxyTransport;

/// Issue/expiry claims carried in the token's middle segment, in seconds.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(((self.exp - self.iat) * 1000) as u64)
    }
}

pub fn parse_claims(token: &str) -> Result<TokenClaims, Error> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::parse("access token has no claims segment"))?;
    let mut padded = payload.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let decoded = URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|err| Error::parse("access token claims are not base64url").with_source(err))?;
    let claims: TokenClaims = serde_json::from_slice(&decoded)
        .map_err(|err| Error::parse("access token claims are not valid json").with_source(err))?;
    if claims.iat >= claims.exp {
        return Err(Error::parse(format!(
            "access token issued at {} does not precede expiry {}",
            claims.iat, claims.exp
        )));
    }
    Ok(claims)
}

#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub claims: TokenClaims,
    pub received_at: Instant,
    pub expires_at: Instant,
    pub refresh_at: Instant,
}

impl AccessToken {
    pub fn new(token: String, now: Instant, refresh_fraction: f64) -> Result<Self, Error> {
        let claims = parse_claims(&token)?;
        let ttl = claims.ttl();
        Ok(Self {
            token,
            claims,
            received_at: now,
            expires_at: now + ttl,
            refresh_at: now + ttl.mul_f64(refresh_fraction),
        })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[derive(Clone, Debug)]
enum TokenState {
    Pending,
    Ready(Arc<AccessToken>),
    Failed(String),
}

struct Refresher {
    transport: Arc<dyn ProxyTransport>,
    credentials: Credentials,
    classifier: Classifier,
    refresh_fraction: f64,
    retry_interval: Duration,
    state: watch::Sender<TokenState>,
    wake: Arc<Notify>,
}

/// Owner of the shared credential; clones share one refresher task.
#[derive(Clone)]
pub struct TokenManager {
    state: watch::Receiver<TokenState>,
    wake: Arc<Notify>,
}

impl TokenManager {
    /// Starts the refresher task; the first login begins immediately.
    pub fn spawn(
        transport: Arc<dyn ProxyTransport>,
        credentials: Credentials,
        config: &ClientConfig,
    ) -> Self {
        let (tx, rx) = watch::channel(TokenState::Pending);
        let wake = Arc::new(Notify::new());
        let refresher = Refresher {
            transport,
            credentials,
            classifier: config.classifier(),
            refresh_fraction: config.token_refresh_fraction,
            retry_interval: config.token_retry_interval(),
            state: tx,
            wake: wake.clone(),
        };
        tokio::spawn(refresher.run());
        Self { state: rx, wake }
    }

    /// Current usable token, waiting for a login or refresh when needed.
    pub async fn token(&self, deadline: Option<Instant>) -> Result<Arc<AccessToken>, Error> {
        let mut state = self.state.clone();
        loop {
            {
                let current = state.borrow_and_update();
                match &*current {
                    TokenState::Ready(token) if !token.is_expired(Instant::now()) => {
                        return Ok(token.clone());
                    }
                    TokenState::Ready(_) => self.wake.notify_one(),
                    TokenState::Failed(message) => {
                        return Err(Error::new(ErrorKind::NotAuthenticated).with_message(message.clone()));
                    }
                    TokenState::Pending => {}
                }
            }
            let changed = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, state.changed())
                    .await
                    .map_err(|_| {
                        Error::new(ErrorKind::NotAuthenticated)
                            .with_message("timed out waiting for access token")
                    })?,
                None => state.changed().await,
            };
            changed.map_err(|_| {
                Error::new(ErrorKind::NotAuthenticated).with_message("credential refresher stopped")
            })?;
        }
    }

    /// Token currently held, if any, without waiting.
    pub fn current(&self) -> Option<Arc<AccessToken>> {
        match &*self.state.borrow() {
            TokenState::Ready(token) => Some(token.clone()),
            _ => None,
        }
    }

    /// Asks the refresher to log in again now; the old token keeps serving meanwhile.
    pub fn force_refresh(&self) {
        self.wake.notify_one();
    }
}

impl Refresher {
    async fn run(self) {
        loop {
            let pause = match self.login().await {
                Ok(token) => {
                    let now = Instant::now();
                    let pause = token.refresh_at.saturating_duration_since(now);
                    debug!(ttl_ms = token.claims.ttl().as_millis() as u64, "access token refreshed");
                    self.state.send_replace(TokenState::Ready(Arc::new(token)));
                    pause
                }
                Err(err) => {
                    warn!(error = %err, "access token refresh failed");
                    let still_valid = matches!(
                        &*self.state.borrow(),
                        TokenState::Ready(token) if !token.is_expired(Instant::now())
                    );
                    if !still_valid {
                        let message = self.classifier.display_message(&err);
                        self.state.send_replace(TokenState::Failed(message));
                    }
                    self.retry_interval
                }
            };
            tokio::select! {
                _ = self.state.closed() => return,
                _ = tokio::time::sleep(pause) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    async fn login(&self) -> Result<AccessToken, Error> {
        let request = tonic::Request::new(AuthRequest {
            username: self.credentials.user.clone(),
            password: self.credentials.password.clone(),
        });
        let response = self
            .transport
            .authenticate(request)
            .await
            .map_err(|status| self.classifier.classify_status(&status, false))?;
        AccessToken::new(response.token, Instant::now(), self.refresh_fraction)
    }
}
