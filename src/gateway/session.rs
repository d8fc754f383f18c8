//! Connection session lifecycle.
//!
//! Owns the single live session to the remote endpoint for one connection
//! name and drives it through
//!
//! ```text
//! Disconnected → Connecting → Connected → Reconnecting → Connecting → Connected
//!                                              └──────────→ Disconnected (budget exhausted)
//! ```
//!
//! Two independent triggers drive recovery: the keep-alive ticker and the
//! failure signal raised by request handlers. Request handlers only ever
//! snapshot the handle; installing a new handle is reserved to this module.
//!
//! The handle sits behind a `std::sync::Mutex` that is held only to clone
//! or swap the `Arc`, never across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::{watch, Notify};

use crate::core::address::NodeAddress;
use crate::core::error::{GatewayError, Result};
use crate::core::security::{AuthMethod, EndpointOffer, SecurityMode, SecurityPolicy};
use crate::core::traits::{Diagnostics, EndpointConnector, RemoteSession, SessionState};
use crate::gateway::config::GatewayConfig;

/// Server status current-time variable, read by keep-alive.
pub const SERVER_TIME_NODE: u32 = 2258;

/// Address of the keep-alive probe node (`ns=0;i=2258`).
pub fn keep_alive_node() -> NodeAddress {
    NodeAddress::numeric(0, SERVER_TIME_NODE)
}

/// Pick the first offer matching policy, mode and auth method.
///
/// Never downgrades: when nothing matches, the error names the requested
/// combination and lists what the server advertised.
pub fn select_endpoint(
    offers: &[EndpointOffer],
    policy: SecurityPolicy,
    mode: SecurityMode,
    auth: AuthMethod,
) -> Result<EndpointOffer> {
    let policy_uri = policy.to_uri();
    offers
        .iter()
        .find(|o| o.policy_uri == policy_uri && o.mode == mode && o.auth_methods.contains(&auth))
        .cloned()
        .ok_or_else(|| {
            let offered: Vec<String> = offers.iter().map(|o| o.to_string()).collect();
            GatewayError::EndpointNegotiationFailed(format!(
                "requested {}/{} with {} authentication; server offers: {}",
                policy,
                mode,
                auth,
                if offered.is_empty() {
                    "nothing".to_string()
                } else {
                    offered.join("; ")
                }
            ))
        })
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
}

/// The live session of one named connection.
pub struct ConnectionSession {
    config: GatewayConfig,
    connector: Arc<dyn EndpointConnector>,
    handle: Mutex<Option<Arc<dyn RemoteSession>>>,
    state: RwLock<SessionState>,
    /// Serializes connect/reconnect cycles.
    cycle: tokio::sync::Mutex<()>,
    failure: Notify,
    counters: Counters,
    last_error: Mutex<Option<String>>,
    last_keep_alive: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl ConnectionSession {
    pub fn new(config: GatewayConfig, connector: Arc<dyn EndpointConnector>) -> Self {
        Self {
            config,
            connector,
            handle: Mutex::new(None),
            state: RwLock::new(SessionState::Disconnected),
            cycle: tokio::sync::Mutex::new(()),
            failure: Notify::new(),
            counters: Counters::default(),
            last_error: Mutex::new(None),
            last_keep_alive: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.connection
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn port(&self) -> u16 {
        self.config.port()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn set_state(&self, state: SessionState) {
        let mut s = self.state.write().unwrap_or_else(|e| e.into_inner());
        let from = *s;
        if from != state {
            tracing::debug!(connection = %self.name(), %from, to = %state, "session state");
            *s = state;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Clone the current handle out of the lock.
    pub fn snapshot(&self) -> Result<Arc<dyn RemoteSession>> {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(GatewayError::NotConnected)
    }

    fn install(&self, session: Arc<dyn RemoteSession>) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    fn take(&self) -> Option<Arc<dyn RemoteSession>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Negotiate an endpoint and open a session, without touching the handle.
    async fn negotiate(&self) -> Result<Arc<dyn RemoteSession>> {
        let timeout = self.config.timeouts.connect();
        let url = self.config.endpoint.as_str();

        let offers = tokio::time::timeout(timeout, self.connector.discover(url))
            .await
            .map_err(|_| GatewayError::timeout("endpoint discovery", timeout))??;
        tracing::debug!(connection = %self.name(), "found {} endpoints", offers.len());

        let offer = select_endpoint(
            &offers,
            self.config.security_policy,
            self.config.security_mode,
            self.config.auth_method,
        )?;
        tracing::info!(
            connection = %self.name(),
            "selected endpoint {} with {}/{}",
            offer.url,
            offer.policy_name(),
            offer.mode
        );

        let identity = self.config.identity();
        tokio::time::timeout(timeout, self.connector.open(&offer, &identity))
            .await
            .map_err(|_| GatewayError::timeout("session open", timeout))?
    }

    /// Initial connect. Failure leaves the session `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let _cycle = self.cycle.lock().await;
        tracing::info!(connection = %self.name(), "connecting to {}", self.endpoint());
        self.set_state(SessionState::Connecting);

        match self.negotiate().await {
            Ok(session) => {
                self.install(session);
                self.set_state(SessionState::Connected);
                tracing::info!(connection = %self.name(), "connected to {}", self.endpoint());
                Ok(())
            }
            Err(e) => {
                self.record_error(&e);
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the broken session and retry up to the attempt ceiling.
    ///
    /// Returns true when a new session was installed. Concurrent calls while
    /// a cycle is running return false immediately.
    pub async fn reconnect(&self) -> bool {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!(connection = %self.name(), "reconnect already in progress");
            return false;
        };

        tracing::warn!(connection = %self.name(), "attempting to reconnect");
        self.set_state(SessionState::Reconnecting);
        if let Some(old) = self.take() {
            self.close_quietly(old).await;
        }

        let timeouts = &self.config.timeouts;
        let max = timeouts.max_reconnect_attempts;
        for attempt in 0..max {
            self.set_state(SessionState::Connecting);
            tracing::info!(connection = %self.name(), "reconnection attempt {}/{}", attempt + 1, max);

            match self.negotiate().await {
                Ok(session) => {
                    self.install(session);
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(SessionState::Connected);
                    tracing::info!(
                        connection = %self.name(),
                        "reconnection successful on attempt {}",
                        attempt + 1
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        connection = %self.name(),
                        "reconnection attempt {} failed: {}",
                        attempt + 1,
                        e
                    );
                    self.record_error(&e);
                    if attempt + 1 < max {
                        self.set_state(SessionState::Reconnecting);
                        let wait = timeouts.backoff(attempt);
                        tracing::info!(connection = %self.name(), "waiting {:?} before next attempt", wait);
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        self.set_state(SessionState::Disconnected);
        tracing::warn!(
            connection = %self.name(),
            "failed to reconnect after {} attempts, will try again on next keep-alive check",
            max
        );
        false
    }

    /// One keep-alive check.
    ///
    /// Connected: probe the server time node and reconnect on failure.
    /// Disconnected: start a fresh reconnect cycle. Transitioning: nothing.
    pub async fn keep_alive_tick(&self) {
        match self.state() {
            SessionState::Connected => {
                if let Err(e) = self.probe().await {
                    tracing::warn!(connection = %self.name(), "keep-alive failed: {}", e);
                    self.record_error(&e);
                    self.reconnect().await;
                } else {
                    *self.last_keep_alive.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some(Utc::now());
                    tracing::debug!(connection = %self.name(), "keep-alive successful");
                }
            }
            SessionState::Disconnected => {
                self.reconnect().await;
            }
            SessionState::Connecting | SessionState::Reconnecting => {}
        }
    }

    async fn probe(&self) -> Result<()> {
        let session = self.snapshot()?;
        let timeout = self.config.timeouts.request();
        tokio::time::timeout(timeout, session.read_value(&keep_alive_node()))
            .await
            .map_err(|_| GatewayError::timeout("keep-alive", timeout))??;
        Ok(())
    }

    /// Raise the call-failure trigger. Handled by `run`.
    pub fn signal_failure(&self) {
        self.failure.notify_one();
    }

    /// Lifecycle loop: keep-alive ticks, failure signals, shutdown.
    ///
    /// Returns after shutdown is signalled, with the session closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.timeouts.keep_alive();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.failure.notified() => {
                    tracing::debug!(connection = %self.name(), "failure signalled by request handler");
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = self.keep_alive_tick() => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(connection = %self.name(), "shutting down session");
        self.close().await;
    }

    /// Remove and close the current handle.
    pub async fn close(&self) {
        if let Some(session) = self.take() {
            self.close_quietly(session).await;
        }
        self.set_state(SessionState::Disconnected);
    }

    async fn close_quietly(&self, session: Arc<dyn RemoteSession>) {
        let timeout = self.config.timeouts.info();
        match tokio::time::timeout(timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(connection = %self.name(), "close failed: {}", e),
            Err(_) => tracing::debug!(connection = %self.name(), "close timed out"),
        }
    }

    pub(crate) fn record_read(&self) {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: &GatewayError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            state: self.state(),
            read_count: self.counters.reads.load(Ordering::Relaxed),
            write_count: self.counters.writes.load(Ordering::Relaxed),
            error_count: self.counters.errors.load(Ordering::Relaxed),
            reconnect_count: self.counters.reconnects.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            last_keep_alive: *self.last_keep_alive.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("connection", &self.config.connection)
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::core::data::Value;
    use crate::gateway::config::TimeoutConfig;
    use crate::protocols::virtual_endpoint::VirtualEndpoint;

    fn offer(policy: SecurityPolicy, mode: SecurityMode, auth: &[AuthMethod]) -> EndpointOffer {
        EndpointOffer::new("opc.tcp://plc:4840", policy, mode, auth.to_vec())
    }

    fn session_for(endpoint: &VirtualEndpoint) -> ConnectionSession {
        let config = GatewayConfig::new(endpoint.url())
            .with_anonymous_identity()
            .with_security(SecurityPolicy::None, SecurityMode::None);
        ConnectionSession::new(config, Arc::new(endpoint.clone()))
    }

    #[test]
    fn test_select_first_compatible() {
        let offers = vec![
            offer(SecurityPolicy::None, SecurityMode::None, &[AuthMethod::Anonymous]),
            offer(SecurityPolicy::Basic256, SecurityMode::SignAndEncrypt, &[AuthMethod::Anonymous]),
            offer(
                SecurityPolicy::Basic256,
                SecurityMode::SignAndEncrypt,
                &[AuthMethod::Anonymous, AuthMethod::UserName],
            ),
        ];
        let chosen = select_endpoint(
            &offers,
            SecurityPolicy::Basic256,
            SecurityMode::SignAndEncrypt,
            AuthMethod::UserName,
        )
        .unwrap();
        assert_eq!(chosen, offers[2]);
    }

    #[test]
    fn test_select_no_downgrade() {
        let offers = vec![offer(SecurityPolicy::None, SecurityMode::None, &[AuthMethod::UserName])];
        let err = select_endpoint(
            &offers,
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            AuthMethod::UserName,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::EndpointNegotiationFailed(_)));
        let msg = err.to_string();
        assert!(msg.contains("Basic256Sha256/Sign"));
        assert!(msg.contains("None/None"));
    }

    #[test]
    fn test_keep_alive_node() {
        assert_eq!(keep_alive_node().to_string(), "ns=0;i=2258");
    }

    #[tokio::test]
    async fn test_connect_installs_handle() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = session_for(&endpoint);
        assert!(matches!(session.snapshot(), Err(GatewayError::NotConnected)));

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.snapshot().is_ok());
    }

    #[tokio::test]
    async fn test_connect_negotiation_failure() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let config = GatewayConfig::new(endpoint.url()).with_user_identity("op", "pw");
        let session = ConnectionSession::new(config, Arc::new(endpoint.clone()));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::EndpointNegotiationFailed(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(endpoint.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_failure_reconnects() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = session_for(&endpoint);
        session.connect().await.unwrap();

        // Server restart: old session dies, server is reachable again.
        endpoint.restart();
        session.keep_alive_tick().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(endpoint.open_count(), 2);
        assert_eq!(session.diagnostics().reconnect_count, 1);
        let handle = session.snapshot().unwrap();
        assert!(handle.read_value(&keep_alive_node()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_exhaustion() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = session_for(&endpoint);
        session.connect().await.unwrap();

        endpoint.set_online(false);
        let started = tokio::time::Instant::now();
        assert!(!session.reconnect().await);

        // 1 + 2 + 4 + 8 seconds between five attempts, none after the last.
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(endpoint.discover_count(), 1 + 5);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.snapshot(), Err(GatewayError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_tick_retriggers_after_exhaustion() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = session_for(&endpoint);
        session.connect().await.unwrap();

        endpoint.set_online(false);
        session.keep_alive_tick().await;
        assert_eq!(session.state(), SessionState::Disconnected);

        endpoint.set_online(true);
        session.keep_alive_tick().await;
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_success_records_time() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = session_for(&endpoint);
        session.connect().await.unwrap();
        session.keep_alive_tick().await;
        assert!(session.diagnostics().last_keep_alive.is_some());
        assert_eq!(endpoint.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handles_failure_signal_and_shutdown() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let session = Arc::new(session_for(&endpoint));
        session.connect().await.unwrap();

        let (tx, rx) = watch::channel(false);
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run(rx).await })
        };

        endpoint.restart();
        session.signal_failure();
        for _ in 0..50 {
            if endpoint.open_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(endpoint.open_count(), 2);
        assert_eq!(session.state(), SessionState::Connected);

        tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(endpoint.closed_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_keep_alive() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        let config = GatewayConfig::new(endpoint.url())
            .with_anonymous_identity()
            .with_security(SecurityPolicy::None, SecurityMode::None)
            .with_timeouts(TimeoutConfig {
                keep_alive_secs: 1,
                ..TimeoutConfig::default()
            });
        let session = Arc::new(ConnectionSession::new(config, Arc::new(endpoint.clone())));
        session.connect().await.unwrap();

        let (tx, rx) = watch::channel(false);
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(endpoint.read_count() >= 2);

        tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_see_not_connected_while_disconnected() {
        let endpoint = VirtualEndpoint::new("virtual://plc");
        endpoint
            .insert_variable("ns=2;s=Speed", "Speed", Value::Double(1.0), true)
            .unwrap();
        let session = session_for(&endpoint);
        assert!(matches!(session.snapshot(), Err(GatewayError::NotConnected)));
        session.connect().await.unwrap();
        session.close().await;
        assert!(matches!(session.snapshot(), Err(GatewayError::NotConnected)));
    }
}
