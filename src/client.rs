//! Application-facing facade pairing the REST client with a gateway session.
//!
//! Both halves share one token. `login` brings them up together, `run`
//! keeps the session alive across dropped connections, and `close` tears
//! everything down.

use std::time::Duration;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gateway::{EventSink, GatewayConfig, GatewayError, GatewaySession};
use crate::http::{HttpClient, HttpClientOptions};
use crate::intents::Intents;
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const RECONNECT_ATTEMPTS: usize = 5;
    pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
    pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
    pub const RECONNECT_JITTER: Duration = Duration::from_secs(1);
}

/// Backoff used by [`Client::run`] to re-establish a lost session.
pub fn default_reconnect_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: ClientDefaults::RECONNECT_ATTEMPTS,
        initial_backoff: ClientDefaults::RECONNECT_BACKOFF,
        max_backoff: ClientDefaults::MAX_RECONNECT_BACKOFF,
        jitter: ClientDefaults::RECONNECT_JITTER,
    }
}

#[derive(Debug)]
pub struct Client {
    http: HttpClient,
    gateway: GatewaySession,
    reconnect_policy: RetryPolicy,
}

impl Client {
    pub fn new<S: EventSink>(token: SecretString, intents: Intents, sink: S) -> Self {
        let http = HttpClient::with_options(token.clone(), HttpClientOptions::default());
        let gateway = GatewaySession::new(GatewayConfig::new(token, intents), sink);
        Self::from_parts(http, gateway)
    }

    /// Builds a client from separately configured halves.
    pub fn from_parts(http: HttpClient, gateway: GatewaySession) -> Self {
        Self {
            http,
            gateway,
            reconnect_policy: default_reconnect_policy(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// REST client handle; clones share locks and the connection pool.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn gateway(&self) -> &GatewaySession {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut GatewaySession {
        &mut self.gateway
    }

    /// Starts the REST client and opens the gateway with a fresh identify.
    pub async fn login(&mut self) -> Result<()> {
        self.http.start().map_err(Error::login)?;
        self.gateway.connect(false).await.map_err(Error::login)?;
        info!(event = "client_logged_in");
        Ok(())
    }

    /// Supervises the gateway session until it is closed or fails for good.
    ///
    /// A dropped connection is re-established with `resume = true`, pacing
    /// attempts with the reconnect policy. Returns `Ok(())` once the session
    /// ends without error.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let err = match self.gateway.wait().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err.into()),
            };
            warn!(event = "gateway_session_lost", error = %err);
            self.reconnect().await?;
        }
    }

    async fn reconnect(&mut self) -> std::result::Result<(), GatewayError> {
        let max_attempts = self.reconnect_policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.reconnect_policy.delay_for_attempt(attempt);
            tokio::time::sleep(delay).await;

            match self.gateway.connect(true).await {
                Ok(()) => {
                    info!(event = "gateway_session_reestablished", attempt);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(event = "gateway_reconnect_failed", attempt, max_attempts, error = %err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Closes the gateway session and drops the REST connection pool.
    pub async fn close(&mut self) {
        self.gateway.close().await;
        self.http.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use tokio::sync::mpsc;

    use super::{default_reconnect_policy, Client};
    use crate::error::Error;
    use crate::gateway::{ConnectionState, GatewayConfig, GatewayError, GatewaySession};
    use crate::http::HttpClient;
    use crate::intents::Intents;

    fn unreachable_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("ws://{addr}/")
    }

    #[test]
    fn reconnect_policy_defaults() {
        let policy = default_reconnect_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn login_wraps_gateway_connect_failure() {
        let token = SecretString::new("token".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();
        let gateway = GatewaySession::new(
            GatewayConfig::new(token.clone(), Intents::default_set())
                .with_endpoint(unreachable_endpoint()),
            tx,
        );
        let mut client = Client::from_parts(HttpClient::new(token), gateway);

        let err = client.login().await.expect_err("login must fail");
        match err {
            Error::LoginFailure(source) => {
                assert!(matches!(*source, Error::Gateway(GatewayError::Connect(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(client.http().is_started());
        assert_eq!(client.gateway().state(), ConnectionState::Disconnected);

        client.close().await;
        assert!(!client.http().is_started());
    }

    #[tokio::test]
    async fn run_without_connection_returns_immediately() {
        let token = SecretString::new("token".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = Client::new(token, Intents::none(), tx);
        client.run().await.expect("nothing to supervise");
    }
}
