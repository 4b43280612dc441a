use crate::reconnect::{ReconnectPolicy, ReconnectPolicyConfig};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use steward_core::protocol::{
    decode_inbound, encode_outbound, FrameError, InboundEvent, OutboundEvent,
};
use steward_core::session::ConnectionState;
use steward_core::DEFAULT_MAX_FRAME_BYTES;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("session id must not be empty")]
    EmptySessionId,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub base_url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicyConfig,
    pub max_frame_bytes: usize,
}

impl ChannelConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicyConfig::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// `<base_url>/chat/<session_id>`, with the id percent-encoded as one
    /// path segment.
    pub fn endpoint(&self, session_id: &str) -> Result<Url, ChannelError> {
        let invalid = |reason: &str| ChannelError::InvalidUrl {
            url: self.base_url.clone(),
            reason: reason.to_string(),
        };
        if session_id.trim().is_empty() {
            return Err(ChannelError::EmptySessionId);
        }
        let mut url = Url::parse(self.base_url.trim()).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid("scheme must be ws or wss"));
        }
        url.path_segments_mut()
            .map_err(|_| invalid("url cannot be a base"))?
            .pop_if_empty()
            .push("chat")
            .push(session_id);
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State {
        session_id: String,
        state: ConnectionState,
    },
    Inbound {
        session_id: String,
        event: InboundEvent,
    },
}

struct Driver {
    session_id: String,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// One duplex connection per session. Inbound events and state changes come
/// out of the receiver returned by [`SessionChannel::new`], in arrival order.
pub struct SessionChannel {
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    driver: Option<Driver>,
}

impl SessionChannel {
    pub fn new(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let channel = Self {
            config,
            events,
            state: Arc::new(state),
            driver: None,
        };
        (channel, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.driver.as_ref().map(|driver| driver.session_id.as_str())
    }

    /// Tears down any live driver before connecting, so two sockets never
    /// serve one channel.
    pub async fn open(&mut self, session_id: &str) -> Result<(), ChannelError> {
        self.close().await;

        let endpoint = match self.config.endpoint(session_id) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!("channel_open_error: {err}");
                publish_state(&self.state, &self.events, session_id, ConnectionState::Error);
                return Err(err);
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = DriverTask {
            session_id: session_id.to_string(),
            endpoint,
            heartbeat_interval: self.config.heartbeat_interval.max(Duration::from_millis(1)),
            max_frame_bytes: self.config.max_frame_bytes,
            policy: ReconnectPolicy::new(self.config.reconnect),
            events: self.events.clone(),
            state: self.state.clone(),
        };
        info!(session_id, endpoint = %task.endpoint, "channel_open");
        let handle = tokio::spawn(task.run(outbound_rx, shutdown_rx));
        self.driver = Some(Driver {
            session_id: session_id.to_string(),
            outbound,
            shutdown: Some(shutdown),
            handle,
        });
        Ok(())
    }

    /// Sends are only accepted while connected; anything else is dropped.
    ///
    /// The state borrow is held while queueing, so the driver cannot publish
    /// a disconnect between the check and the push.
    pub fn send(&self, event: OutboundEvent) -> bool {
        let Some(driver) = self.driver.as_ref() else {
            debug!(kind = event.kind(), "channel_send_dropped: no session");
            return false;
        };
        let state = self.state.borrow();
        if *state != ConnectionState::Connected {
            debug!(kind = event.kind(), state = %*state, "channel_send_dropped");
            return false;
        }
        driver.outbound.send(event).is_ok()
    }

    /// Stops the driver and waits for it, so no reconnect can land after
    /// this returns.
    pub async fn close(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        if let Some(shutdown) = driver.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(err) = (&mut driver.handle).await {
            if !err.is_cancelled() {
                warn!("channel_driver_join_error: {err}");
            }
        }
        publish_state(
            &self.state,
            &self.events,
            &driver.session_id,
            ConnectionState::Disconnected,
        );
        info!(session_id = %driver.session_id, "channel_closed");
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.handle.abort();
        }
    }
}

fn publish_state(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    session_id: &str,
    next: ConnectionState,
) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        let _ = events.send(ChannelEvent::State {
            session_id: session_id.to_string(),
            state: next,
        });
    }
}

enum SessionEnd {
    Shutdown,
    Dropped,
}

struct DriverTask {
    session_id: String,
    endpoint: Url,
    heartbeat_interval: Duration,
    max_frame_bytes: usize,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl DriverTask {
    async fn run(
        mut self,
        mut outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        // Heartbeat runs for the driver's whole life, independent of backoff.
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.policy.on_connecting();
            self.set_state(ConnectionState::Connecting);

            let connect = connect_async(self.endpoint.to_string());
            tokio::pin!(connect);
            let connected = loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        self.shutdown();
                        return;
                    }
                    _ = heartbeat.tick() => {}
                    result = &mut connect => break result,
                }
            };

            match connected {
                Ok((socket, _)) => {
                    self.policy.on_connected();
                    self.set_state(ConnectionState::Connected);
                    info!(session_id = %self.session_id, "channel_connected");
                    let end = self
                        .serve(socket, &mut outbound_rx, &mut shutdown_rx, &mut heartbeat)
                        .await;
                    if let SessionEnd::Shutdown = end {
                        self.shutdown();
                        return;
                    }
                }
                Err(err) => {
                    warn!("channel_connect_error: {err}");
                }
            }
            self.set_state(ConnectionState::Disconnected);

            // Nothing queued for a dead socket survives into the next one.
            let mut discarded = 0usize;
            while outbound_rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(session_id = %self.session_id, discarded, "channel_outbound_discarded");
            }

            let Some(delay) = self.policy.on_disconnected() else {
                warn!(
                    session_id = %self.session_id,
                    attempts = self.policy.attempts(),
                    "channel_reconnect_exhausted"
                );
                return;
            };
            info!(
                session_id = %self.session_id,
                attempt = self.policy.attempts(),
                delay_ms = delay.as_millis() as u64,
                "channel_reconnect_scheduled"
            );
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        self.shutdown();
                        return;
                    }
                    _ = heartbeat.tick() => {}
                    _ = &mut sleep => break,
                }
            }
        }
    }

    async fn serve(
        &self,
        mut socket: Socket,
        outbound_rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
        shutdown_rx: &mut oneshot::Receiver<()>,
        heartbeat: &mut tokio::time::Interval,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    let _ = socket.close(None).await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    if !self.write(&mut socket, &OutboundEvent::Ping).await {
                        return SessionEnd::Dropped;
                    }
                }
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Close(frame))) => {
                            debug!(session_id = %self.session_id, ?frame, "channel_remote_close");
                            return SessionEnd::Dropped;
                        }
                        Some(Ok(_)) => {}
                        // Transport errors carry nothing useful; the state change is the signal.
                        Some(Err(err)) => {
                            debug!(session_id = %self.session_id, "channel_transport_error: {err}");
                            return SessionEnd::Dropped;
                        }
                        None => return SessionEnd::Dropped,
                    }
                }
                Some(event) = outbound_rx.recv() => {
                    if !self.write(&mut socket, &event).await {
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }

    /// False only when the socket is gone; unencodable events are skipped.
    async fn write(&self, socket: &mut Socket, event: &OutboundEvent) -> bool {
        let frame = match encode_outbound(event, self.max_frame_bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(kind = event.kind(), "channel_encode_error: {err}");
                return true;
            }
        };
        match socket.send(Message::Text(frame)).await {
            Ok(()) => true,
            Err(err) => {
                debug!(kind = event.kind(), "channel_send_error: {err}");
                false
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match decode_inbound(text, self.max_frame_bytes) {
            Ok(event) => {
                let _ = self.events.send(ChannelEvent::Inbound {
                    session_id: self.session_id.clone(),
                    event,
                });
            }
            Err(FrameError::OversizedFrame { size, max }) => {
                warn!(session_id = %self.session_id, size, max, "channel_frame_oversized");
                let _ = self.events.send(ChannelEvent::Inbound {
                    session_id: self.session_id.clone(),
                    event: InboundEvent::Error {
                        content: format!(
                            "Dropped a {size}-byte message from the agent (limit {max} bytes)"
                        ),
                    },
                });
            }
            Err(err) if err.is_forward_compatible() => {
                debug!(session_id = %self.session_id, "channel_event_ignored: {err}");
            }
            Err(err) => {
                warn!(session_id = %self.session_id, "channel_decode_error: {err}");
            }
        }
    }

    fn shutdown(&mut self) {
        self.policy.on_closed();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, next: ConnectionState) {
        publish_state(&self.state, &self.events, &self.session_id, next);
    }
}
