use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::pending::PendingCommands;
use super::state::ConnectionStateMachine;
use super::transport::{Connector, Duplex};
use super::wire::{self, ClientFrame, MetricsRequest, OptimizeTarget, ServerEvent};
use crate::broadcast::{Broadcast, Subscription};
use crate::config::ChannelConfig;
use crate::error::{PulseError, Result};
use crate::types::{Command, CommandOutcome, ConnectionState, MetricsSnapshot};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum SessionEnd {
    Closed,
    Failed(PulseError),
    Shutdown,
}

/// The persistent duplex connection to the monitored entity.
///
/// Owns the latest metrics snapshot (single writer: the session driver),
/// the connection state machine and the correlation table for
/// request/response round trips.
pub struct TelemetryChannel {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    transition: Mutex<()>,
    state: Broadcast<ConnectionState>,
    metrics: Broadcast<MetricsSnapshot>,
    outcomes: Broadcast<CommandOutcome>,
    pending: PendingCommands,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU32,
    gave_up: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl TelemetryChannel {
    pub fn new(config: ChannelConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            connector,
            transition: Mutex::new(()),
            state: Broadcast::with_initial(ConnectionState::Disconnected),
            metrics: Broadcast::new(),
            outcomes: Broadcast::new(),
            pending: PendingCommands::new(),
            outbound: Mutex::new(None),
            attempts: AtomicU32::new(0),
            gave_up: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Manual (re)connect. Resets the attempt counter, starts the
    /// reconnecting supervisor and resolves with the state reached by the
    /// first attempt. Transport failures are never returned as errors.
    pub async fn connect(self: &Arc<Self>) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            log::warn!("connect called on a shut down channel");
            return self.connection_state();
        }

        let first_attempt = {
            let mut supervisor = lock(&self.supervisor);
            let running = supervisor.as_ref().is_some_and(|h| !h.is_finished());
            let state = self.connection_state();
            if running && matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                return state;
            }

            if let Some(previous) = supervisor.take() {
                previous.abort();
            }

            self.attempts.store(0, Ordering::SeqCst);
            self.gave_up.store(false, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            let channel = self.clone();
            *supervisor = Some(tokio::spawn(async move { channel.supervise(tx).await }));
            rx
        };

        first_attempt
            .await
            .unwrap_or_else(|_| self.connection_state())
    }

    async fn supervise(self: Arc<Self>, first_attempt: oneshot::Sender<ConnectionState>) {
        let mut first_attempt = Some(first_attempt);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let end = match self.connector.connect(&self.config.url).await {
                Ok(duplex) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *lock(&self.outbound) = Some(tx);
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    log::info!("connected to {}", self.config.url);

                    if let Some(first) = first_attempt.take() {
                        let _ = first.send(ConnectionState::Connected);
                    }
                    self.prime_cache();

                    let end = self.run_session(duplex, rx, &mut shutdown).await;
                    *lock(&self.outbound) = None;
                    let dropped = self.pending.fail_all("connection closed");
                    if dropped > 0 {
                        log::warn!("{} in-flight requests failed by disconnect", dropped);
                    }
                    end
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Closed => {
                    log::info!("disconnected from {}", self.config.url);
                    self.set_state(ConnectionState::Disconnected);
                }
                SessionEnd::Failed(e) => {
                    log::error!("transport error on {}: {}", self.config.url, e);
                    self.set_state(ConnectionState::Error);
                }
            }

            if let Some(first) = first_attempt.take() {
                let _ = first.send(self.connection_state());
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_attempts {
                log::error!(
                    "giving up on {} after {} reconnect attempts; waiting for a manual connect",
                    self.config.url,
                    self.config.max_attempts
                );
                self.gave_up.store(true, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                break;
            }

            log::info!(
                "reconnecting in {:?} (attempt {}/{})",
                self.config.retry_delay(),
                attempt,
                self.config.max_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn run_session(
        &self,
        duplex: Duplex,
        mut outbound: mpsc::UnboundedReceiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Duplex {
            mut sink,
            mut stream,
        } = duplex;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                Some(frame) = outbound.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        return SessionEnd::Failed(e);
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        if !self.handle_frame(&text) {
                            let _ = sink.close().await;
                            return SessionEnd::Closed;
                        }
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    /// Returns `false` when the remote asked to end the session.
    fn handle_frame(&self, text: &str) -> bool {
        match wire::decode(text) {
            Ok(ServerEvent::Snapshot(snapshot)) => {
                self.metrics.publish(snapshot);
            }
            Ok(ServerEvent::Ack { id, reply }) => {
                if !self.pending.resolve(id, reply) {
                    log::debug!("dropping ack for unknown or expired command {}", id);
                }
            }
            Ok(ServerEvent::Response { id, event, data }) => {
                if event == "systemMetrics" {
                    match serde_json::from_value::<MetricsSnapshot>(data.clone()) {
                        Ok(snapshot) => {
                            self.metrics.publish(snapshot);
                        }
                        Err(e) => log::warn!("malformed systemMetrics payload: {}", e),
                    }
                }
                if !self.pending.resolve(id, Ok(data)) {
                    log::debug!("dropping {} for unknown or expired request {}", event, id);
                }
            }
            Ok(ServerEvent::Connect) => log::debug!("remote confirmed connection"),
            Ok(ServerEvent::Disconnect) => {
                log::info!("remote closed the session");
                return false;
            }
            Ok(ServerEvent::Error(message)) => log::warn!("remote reported error: {}", message),
            Ok(ServerEvent::Other(event)) => log::debug!("ignoring '{}' event", event),
            Err(e) => log::warn!("dropping malformed frame: {}", e),
        }
        true
    }

    fn prime_cache(&self) {
        let frame = ClientFrame::request(MetricsRequest::System.event(), Uuid::new_v4(), Value::Null);
        if let Err(e) = self.emit(&frame) {
            log::debug!("could not request initial metrics: {}", e);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let _transition = lock(&self.transition);
        let mut current = self.connection_state();
        match ConnectionStateMachine::transition(&mut current, next) {
            Ok(true) => {
                log::debug!("connection state -> {}", next.as_str());
                self.state.publish(next);
            }
            Ok(false) => {}
            Err(e) => log::warn!("{}", e),
        }
    }

    fn emit(&self, frame: &ClientFrame) -> Result<()> {
        let text = frame.encode()?;
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx
                .send(text)
                .map_err(|_| PulseError::Connection("connection closed".to_string())),
            None => Err(PulseError::Connection("not connected".to_string())),
        }
    }

    async fn round_trip<F>(&self, label: &str, frame: F) -> Result<Value>
    where
        F: FnOnce(Uuid) -> Result<ClientFrame>,
    {
        let id = Uuid::new_v4();
        let (guard, reply) = self.pending.register(id, label);

        let result = match frame(id).and_then(|frame| self.emit(&frame)) {
            Err(e) => Err(e),
            Ok(()) => match tokio::time::timeout(self.config.ack_timeout(), reply).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(PulseError::Connection("request abandoned".to_string())),
                Err(_) => Err(PulseError::Timeout {
                    command: label.to_string(),
                    timeout_ms: self.config.ack_timeout_ms,
                }),
            },
        };
        drop(guard);

        match &result {
            Ok(_) => log::debug!("'{}' acknowledged", label),
            Err(e) => log::warn!("'{}' failed: {}", label, e),
        }
        self.outcomes.publish(CommandOutcome {
            id,
            command: label.to_string(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        });

        result
    }

    /// Sends `{type, payload}` and waits for the remote's acknowledgement.
    pub async fn send_command(&self, command_type: &str, payload: Value) -> Result<Value> {
        let command = Command::new(command_type, payload);
        self.dispatch(&command).await
    }

    pub async fn dispatch(&self, command: &Command) -> Result<Value> {
        self.round_trip(&command.command_type, |id| ClientFrame::command(id, command))
            .await
    }

    pub async fn request_metrics(&self, request: MetricsRequest) -> Result<Value> {
        let event = request.event();
        self.round_trip(event, |id| Ok(ClientFrame::request(event, id, Value::Null)))
            .await
    }

    pub async fn optimize(&self, target: OptimizeTarget) -> Result<Value> {
        let event = target.event();
        self.round_trip(event, |id| Ok(ClientFrame::request(event, id, Value::Null)))
            .await
    }

    pub fn subscribe_metrics<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<MetricsSnapshot>) + Send + Sync + 'static,
    {
        self.metrics.subscribe(callback)
    }

    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<ConnectionState>) + Send + Sync + 'static,
    {
        self.state.subscribe(callback)
    }

    pub fn subscribe_outcomes<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<CommandOutcome>) + Send + Sync + 'static,
    {
        self.outcomes.subscribe(callback)
    }

    pub fn latest_metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.metrics.latest()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.latest().map(|s| *s).unwrap_or_default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// True once the supervisor has exhausted `max_attempts`. Only a manual
    /// `connect` clears it.
    pub fn gave_up(&self) -> bool {
        self.gave_up.load(Ordering::SeqCst)
    }

    /// True while a supervisor is connected or waiting out a retry.
    pub fn is_supervising(&self) -> bool {
        lock(&self.supervisor)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops reconnecting, closes the session and fails in-flight requests.
    /// Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        let supervisor = lock(&self.supervisor).take();
        if let Some(mut handle) = supervisor {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        *lock(&self.outbound) = None;
        self.pending.fail_all("channel shut down");
        self.set_state(ConnectionState::Disconnected);
        log::info!("telemetry channel to {} shut down", self.config.url);
    }
}
