//! Hub session manager
//!
//! Maintains one authenticated, subscribed WebSocket session against the
//! highest-priority reachable endpoint and forwards event frames to the
//! enrichment inbox in receipt order. Survives hub and network failures:
//! fixed 5 s gap between endpoint attempts, unlimited retries, subscriptions
//! replayed after every reconnect.
//!
//! State machine:
//! `Disconnected → Connecting → Authenticating → Subscribing → Active →
//! Reconnecting → ...` (terminal only on shutdown).

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::CapabilityStore;
use crate::config::HubConfig;
use crate::context::clock::SharedClock;
use crate::enrichment::pipeline::EventInbox;
use crate::enrichment::normalize::raw_from_envelope;
use crate::types::{ClientFrame, HubFrame};

use super::endpoints::EndpointSet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the session currently is; published for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Active,
    Reconnecting,
}

/// Why a session ended; drives the reconnect policy.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("authentication rejected")]
    AuthInvalid,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("subscription failed: {0}")]
    Subscribe(String),
    #[error("receive watchdog expired")]
    Watchdog,
    #[error("connection closed by hub")]
    Closed,
}

/// What an outstanding request id maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Subscribe(String),
    DeviceRegistry,
    EntityRegistry,
    ConfigEntries,
    Ping,
}

/// Session counters for the observability surface.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub events_forwarded: AtomicU64,
    pub frames_received: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionSnapshot {
    pub events_forwarded: u64,
    pub frames_received: u64,
    pub reconnects: u64,
}

impl SessionMetrics {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// The hub session task.
pub struct HubSession {
    config: HubConfig,
    endpoints: EndpointSet,
    inbox: Arc<EventInbox>,
    capabilities: Arc<CapabilityStore>,
    clock: SharedClock,
    metrics: Arc<SessionMetrics>,
    state: Arc<arc_swap::ArcSwap<SessionState>>,
    next_id: u64,
}

impl HubSession {
    pub fn new(
        config: HubConfig,
        inbox: Arc<EventInbox>,
        capabilities: Arc<CapabilityStore>,
        clock: SharedClock,
    ) -> Self {
        let endpoints = EndpointSet::new(config.url.clone(), &config.fallback_urls);
        Self {
            config,
            endpoints,
            inbox,
            capabilities,
            clock,
            metrics: Arc::new(SessionMetrics::default()),
            state: Arc::new(arc_swap::ArcSwap::from_pointee(SessionState::Disconnected)),
            next_id: 0,
        }
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Published state handle for health reporting.
    pub fn state_handle(&self) -> Arc<arc_swap::ArcSwap<SessionState>> {
        Arc::clone(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(Arc::new(state));
    }

    /// Monotonic per-session request ids (reset on reconnect).
    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Drive connect/auth/subscribe/active cycles until cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("hub session manager started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = self.clock.now();
            let Some((endpoint_index, url)) = self.endpoints.next_available(now) else {
                if self.endpoints.all_demoted(now) {
                    error!("could not connect to hub: all endpoints demoted");
                }
                self.set_state(SessionState::Reconnecting);
                if wait_or_cancel(&cancel, Duration::from_secs(self.config.reconnect_delay_secs))
                    .await
                {
                    break;
                }
                continue;
            };

            self.set_state(SessionState::Connecting);
            match self.run_once(endpoint_index, &url, &cancel).await {
                Ok(()) => {
                    // Clean shutdown path.
                    break;
                }
                Err(SessionError::AuthInvalid) => {
                    // No retry on the same token against this endpoint.
                    error!(url = %url, "hub rejected credentials");
                    self.endpoints.demote(endpoint_index, self.clock.now());
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "hub session ended, will reconnect");
                    self.endpoints.record_failure(endpoint_index, self.clock.now());
                }
            }

            self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            self.set_state(SessionState::Reconnecting);
            // Fixed gap between endpoint attempts; unlimited attempts.
            if wait_or_cancel(&cancel, Duration::from_secs(self.config.reconnect_delay_secs))
                .await
            {
                break;
            }
        }

        self.set_state(SessionState::Disconnected);
        info!("hub session manager stopped");
    }

    /// One full connect → auth → subscribe → active cycle. Ok(()) only on
    /// cancellation; every other exit is a reconnectable error.
    async fn run_once(
        &mut self,
        endpoint_index: usize,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.next_id = 0;

        let (mut ws, _) = tokio::time::timeout(Duration::from_secs(30), connect_async(url))
            .await
            .map_err(|_| SessionError::Connect("connect timed out".to_string()))?
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        debug!(url, "channel open");

        // --- Authenticating ---
        self.set_state(SessionState::Authenticating);
        match recv_frame(&mut ws, Duration::from_secs(10)).await? {
            HubFrame::AuthRequired { ha_version } => {
                debug!(?ha_version, "auth required");
            }
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected auth_required, got {other:?}"
                )))
            }
        }
        send_frame(
            &mut ws,
            &ClientFrame::Auth {
                access_token: self.config.token.clone(),
            },
        )
        .await?;
        match recv_frame(&mut ws, Duration::from_secs(10)).await? {
            HubFrame::AuthOk { ha_version } => {
                info!(?ha_version, "authenticated with hub");
            }
            HubFrame::AuthInvalid { message } => {
                warn!(?message, "auth_invalid");
                return Err(SessionError::AuthInvalid);
            }
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected auth result, got {other:?}"
                )))
            }
        }

        // --- Subscribing ---
        self.set_state(SessionState::Subscribing);
        let mut pending: HashMap<u64, Pending> = HashMap::new();
        for event_type in self.config.event_types.clone() {
            let id = self.next_request_id();
            send_frame(
                &mut ws,
                &ClientFrame::SubscribeEvents {
                    id,
                    event_type: Some(event_type.clone()),
                },
            )
            .await?;
            pending.insert(id, Pending::Subscribe(event_type));
        }

        // --- Active ---
        self.set_state(SessionState::Active);
        self.endpoints.record_success(endpoint_index);
        info!(subscriptions = self.config.event_types.len(), "hub session active");

        // Discovery: three one-shot registry requests, issued on entering
        // Active.
        let device_request = self.next_request_id();
        send_frame(&mut ws, &ClientFrame::DeviceRegistryList { id: device_request }).await?;
        pending.insert(device_request, Pending::DeviceRegistry);

        let entity_request = self.next_request_id();
        send_frame(&mut ws, &ClientFrame::EntityRegistryList { id: entity_request }).await?;
        pending.insert(entity_request, Pending::EntityRegistry);

        let entries_request = self.next_request_id();
        send_frame(&mut ws, &ClientFrame::ConfigEntriesList { id: entries_request }).await?;
        pending.insert(entries_request, Pending::ConfigEntries);

        let watchdog = Duration::from_secs(self.config.watchdog_secs);
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // First tick fires immediately; skip it.

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let id = self.next_request_id();
                    pending.insert(id, Pending::Ping);
                    send_frame(&mut ws, &ClientFrame::Ping { id }).await?;
                }
                frame = tokio::time::timeout(watchdog, ws.next()) => {
                    let frame = frame.map_err(|_| SessionError::Watchdog)?;
                    let Some(message) = frame else {
                        return Err(SessionError::Closed);
                    };
                    let message = message.map_err(|e| SessionError::Protocol(e.to_string()))?;
                    self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                    self.handle_message(&mut ws, message, &mut pending).await?;
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        ws: &mut WsStream,
        message: Message,
        pending: &mut HashMap<u64, Pending>,
    ) -> Result<(), SessionError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload))
                    .await
                    .map_err(|e| SessionError::Protocol(e.to_string()))?;
                return Ok(());
            }
            Message::Close(_) => return Err(SessionError::Closed),
            _ => return Ok(()),
        };

        let frame: HubFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable frame from hub");
                return Ok(());
            }
        };

        match frame {
            HubFrame::Event { event, .. } => {
                let raw = raw_from_envelope(
                    &event.event_type,
                    &event.data,
                    event.time_fired.as_deref(),
                    event.context,
                );
                self.inbox.push(raw);
                self.metrics.events_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            HubFrame::Result { id, success, result, error } => {
                self.handle_result(id, success, result, error, pending);
            }
            HubFrame::Ping { id } => {
                send_frame(ws, &ClientFrame::Pong { id }).await?;
            }
            HubFrame::Pong { id } => {
                pending.remove(&id);
            }
            HubFrame::AuthRequired { .. } | HubFrame::AuthOk { .. } | HubFrame::AuthInvalid { .. } => {
                return Err(SessionError::Protocol("auth frame while active".to_string()));
            }
            HubFrame::Unknown => {
                debug!("ignoring unknown frame type");
            }
        }
        Ok(())
    }

    fn handle_result(
        &mut self,
        id: u64,
        success: bool,
        result: Option<Value>,
        error: Option<crate::types::CommandError>,
        pending: &mut HashMap<u64, Pending>,
    ) {
        let Some(request) = pending.remove(&id) else {
            debug!(id, "result for unknown request id");
            return;
        };

        if !success {
            let detail = error.map(|e| e.to_string()).unwrap_or_default();
            match &request {
                // A failed subscription is fatal for that subscription only.
                Pending::Subscribe(event_type) => {
                    error!(event_type = %event_type, detail = %detail, "subscription rejected");
                }
                other => warn!(?other, detail = %detail, "request failed"),
            }
            return;
        }

        match request {
            Pending::Subscribe(event_type) => {
                info!(event_type = %event_type, "subscription confirmed");
            }
            Pending::DeviceRegistry => {
                if let Some(Value::Array(devices)) = result {
                    self.capabilities.refresh_from_device_list(&devices);
                }
            }
            Pending::EntityRegistry => {
                if let Some(Value::Array(entities)) = result {
                    self.capabilities.refresh_entity_models(&entities);
                }
            }
            Pending::ConfigEntries => {
                let count = result
                    .as_ref()
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                debug!(entries = count, "config entries received");
            }
            Pending::Ping => {}
        }
    }
}

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> Result<(), SessionError> {
    let json =
        serde_json::to_string(frame).map_err(|e| SessionError::Protocol(e.to_string()))?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| SessionError::Protocol(e.to_string()))
}

async fn recv_frame(ws: &mut WsStream, timeout: Duration) -> Result<HubFrame, SessionError> {
    loop {
        let message = tokio::time::timeout(timeout, ws.next())
            .await
            .map_err(|_| SessionError::Protocol("handshake timed out".to_string()))?
            .ok_or(SessionError::Closed)?
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text)
                    .map_err(|e| SessionError::Protocol(e.to_string()));
            }
            Message::Close(_) => return Err(SessionError::Closed),
            _ => continue,
        }
    }
}

/// Sleep that aborts early on cancellation. Returns true when cancelled.
async fn wait_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
