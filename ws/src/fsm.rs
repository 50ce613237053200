//! Session State Machine (spec §4.6): connection lifecycle, retry driver,
//! and event dispatcher.
//!
//! [`apply`] is the pure transition table from spec §4.6 — kept separate
//! from the imperative driver below so the reachability property (spec §8
//! item 4) can be checked without spinning up any I/O. The driver itself is
//! one task consuming a single event channel, per the concurrency model's
//! preferred option over a shared mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use wavelink_types::{Frame, HelloData, SignalType};

use crate::config::{GatewayConfig, RetryConfig};
use crate::decompress::DecompressorPool;
use crate::discovery::GatewayDiscovery;
use crate::frame::parse_frame;
use crate::heartbeat::{self, HeartbeatHandles};
use crate::session::SessionIdentity;
use crate::transport::{Reader, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Start,
    Init,
    Gateway,
    WSConnected,
    Connected,
    Retry,
}

/// Events driving [`apply`]. `FrameReceived`/`ReaderClosed` are not part of
/// spec §4.6's literal table (they are how the reader task's observations
/// reach the driver) but every other variant corresponds to a named row.
/// `ReconnectSignal` and `Shutdown` are exogenous, valid from any state, and
/// handled outside the table for the same reason (see [`apply`]'s doc).
#[derive(Debug, Clone)]
pub enum FsmEvent {
    Start,
    GotGateway(String),
    WsConnected,
    WsConnectFail,
    HelloReceived,
    HelloFail,
    HelloGatewayErr,
    PongReceived,
    HeartbeatTimeout,
    RetryHeartbeatTimeout,
    ResumeReceivedOk,
    ReconnectSignal,
    FrameReceived(Frame),
    ReaderClosed,
    SendNack(Vec<i64>),
    Shutdown,
}

/// The pure transition table from spec §4.6. `ReconnectSignal` is handled
/// as a global reset outside this table (spec §4.6/§7 describe it as
/// exogenous: valid from any state), so it's absent here by design.
pub fn apply(state: SessionState, event: &FsmEvent) -> Option<SessionState> {
    use SessionState::*;
    match (state, event) {
        (Start, FsmEvent::Start) => Some(Init),
        (Init, FsmEvent::GotGateway(_)) => Some(Gateway),
        (Gateway, FsmEvent::WsConnected) => Some(WSConnected),
        (Gateway, FsmEvent::WsConnectFail) => Some(Init),
        (WSConnected, FsmEvent::HelloReceived) => Some(Connected),
        (WSConnected, FsmEvent::HelloFail) => Some(Gateway),
        (WSConnected, FsmEvent::HelloGatewayErr) => Some(Init),
        (Connected, FsmEvent::PongReceived)
        | (WSConnected, FsmEvent::PongReceived)
        | (Retry, FsmEvent::PongReceived) => Some(Connected),
        (Connected, FsmEvent::HeartbeatTimeout) => Some(Retry),
        (Retry, FsmEvent::RetryHeartbeatTimeout) => Some(Gateway),
        (WSConnected, FsmEvent::ResumeReceivedOk) | (Connected, FsmEvent::ResumeReceivedOk) => {
            Some(Connected)
        }
        _ => None,
    }
}

/// Drives the lifecycle of one gateway session. Not `Clone`/`Send`-shared:
/// owned and run by a single task; [`crate::session_handle::GatewaySession`]
/// is the handle other tasks talk to.
pub struct Fsm {
    state: Arc<Mutex<SessionState>>,
    config: GatewayConfig,
    discovery: GatewayDiscovery,
    transport: Transport,
    session: SessionIdentity,
    gateway_url: Option<String>,
    gateway_retry_override: Option<RetryConfig>,
    max_sn: Arc<Mutex<i64>>,
    last_pong_at: Arc<Mutex<Option<Instant>>>,
    events_tx: mpsc::UnboundedSender<Frame>,
    control_tx: mpsc::UnboundedSender<FsmEvent>,
    control_rx: mpsc::UnboundedReceiver<FsmEvent>,
    heartbeat: Option<HeartbeatHandles>,
    reader_handle: Option<tokio::task::JoinHandle<()>>,
    decompressor_pool: Arc<Mutex<DecompressorPool>>,
    terminated: Arc<AtomicBool>,
}

impl Fsm {
    pub fn new(
        config: GatewayConfig,
        discovery: GatewayDiscovery,
        transport: Transport,
        events_tx: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        let session = SessionIdentity::load(&config.session_file);
        let max_sn = session.max_sn;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(SessionState::Start)),
            config,
            discovery,
            transport,
            session,
            gateway_url: None,
            gateway_retry_override: None,
            max_sn: Arc::new(Mutex::new(max_sn)),
            last_pong_at: Arc::new(Mutex::new(None)),
            events_tx,
            control_tx,
            control_rx,
            heartbeat: None,
            reader_handle: None,
            decompressor_pool: Arc::new(Mutex::new(DecompressorPool::new())),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A sender external tasks (the reader, a shutdown hook) can use to
    /// push events into the FSM's single control channel.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<FsmEvent> {
        self.control_tx.clone()
    }

    pub async fn current_state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Run the lifecycle until a fatal error, a shutdown request, or the
    /// control channel closes.
    pub async fn run(mut self) {
        self.set_state(SessionState::Init).await;
        loop {
            let state = self.current_state().await;
            match state {
                SessionState::Start => self.set_state(SessionState::Init).await,
                SessionState::Init => self.enter_init().await,
                SessionState::Gateway => self.enter_gateway().await,
                SessionState::WSConnected => self.enter_ws_connected().await,
                SessionState::Connected => self.enter_connected().await,
                SessionState::Retry => self.enter_retry().await,
            }
            if self.terminated.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Close the transport with a normal-closure frame, stop the heartbeat
    /// and reader, and mark the driver loop for termination (spec §6 Exit,
    /// §5 Cancellation).
    async fn handle_shutdown(&mut self) {
        debug!("shutdown requested, closing with normal closure");
        self.stop_heartbeat().await;
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        self.transport.close_normal().await;
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Abort any running heartbeat tasks and drop the handle. Idempotent.
    async fn stop_heartbeat(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
    }

    /// Race `dur` against the control channel, handling only `Shutdown`
    /// specially (other events are drained and ignored — nothing but a
    /// stray `ReaderClosed` from a prior connection is expected while
    /// waiting out a retry delay). Returns `true` if shutdown was handled
    /// and the caller should return immediately.
    async fn sleep_or_shutdown(&mut self, dur: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(dur);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                event = self.control_rx.recv() => {
                    if let Some(FsmEvent::Shutdown) = event {
                        self.handle_shutdown().await;
                        return true;
                    }
                }
            }
        }
    }

    async fn set_state(&self, next: SessionState) {
        let mut guard = self.state.lock().await;
        debug!("fsm transition: {:?} -> {:?}", *guard, next);
        *guard = next;
    }

    async fn enter_init(&mut self) {
        let cfg = self.gateway_retry_override.take().unwrap_or(RetryConfig::INIT);
        let mut attempt = 0u32;
        loop {
            if self.sleep_or_shutdown(cfg.delay_for_attempt(attempt)).await {
                return;
            }
            match self
                .discovery
                .request_gateway(self.config.decompress_mode, self.config.dict_version.as_deref())
                .await
            {
                Ok(url) => {
                    self.gateway_url = Some(url);
                    self.set_state(SessionState::Gateway).await;
                    return;
                }
                Err(e) => {
                    warn!("gateway discovery failed: {e}");
                    attempt += 1;
                    if !cfg.should_retry(attempt) {
                        return;
                    }
                }
            }
        }
    }

    async fn enter_gateway(&mut self) {
        let cfg = RetryConfig::GATEWAY;
        let mut attempt = 0u32;
        let url = self.build_connect_url();
        loop {
            if self.sleep_or_shutdown(cfg.delay_for_attempt(attempt)).await {
                return;
            }
            match self.transport.connect(&url).await {
                Ok(reader) => {
                    self.spawn_reader(reader);
                    self.set_state(SessionState::WSConnected).await;
                    return;
                }
                Err(e) => {
                    warn!("websocket connect failed: {e}");
                    attempt += 1;
                    if !cfg.should_retry(attempt) {
                        self.set_state(SessionState::Init).await;
                        return;
                    }
                }
            }
        }
    }

    fn build_connect_url(&self) -> String {
        let base = self.gateway_url.clone().unwrap_or_default();
        if self.session.is_present() {
            append_resume_params(&base, &self.session)
        } else {
            base
        }
    }

    fn spawn_reader(&mut self, mut reader: Reader) {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        let control_tx = self.control_tx.clone();
        let protocol_version = self.config.protocol_version;
        let decompress_mode = self.config.decompress_mode;
        let pool = self.decompressor_pool.clone();

        self.reader_handle = Some(tokio::spawn(async move {
            let mut decompressor = match pool.lock().await.acquire(decompress_mode) {
                Ok(d) => d,
                Err(e) => {
                    warn!("failed to acquire decompressor: {e}");
                    let _ = control_tx.send(FsmEvent::ReaderClosed);
                    return;
                }
            };

            while let Some(message) = reader.next().await {
                let raw = match message {
                    Ok(Message::Binary(data)) => data.to_vec(),
                    Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let envelope_payload = match crate::codec::decode(&raw, protocol_version) {
                    Ok(envelope) => envelope.payload.to_vec(),
                    Err(e) => {
                        warn!("codec decode error: {e}");
                        continue;
                    }
                };

                let decoded = match decompressor.decompress(&envelope_payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("decompress error: {e}");
                        decompressor.reset();
                        continue;
                    }
                };
                if decoded.is_empty() {
                    // Streaming decompressor buffered a partial frame; nothing to parse yet.
                    continue;
                }

                match parse_frame(&decoded) {
                    Ok(Some(frame)) => {
                        if control_tx.send(FsmEvent::FrameReceived(frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("frame parse error: {e}"),
                }
            }

            pool.lock().await.release(decompress_mode, decompressor);
            let _ = control_tx.send(FsmEvent::ReaderClosed);
        }));
    }

    async fn enter_ws_connected(&mut self) {
        let cfg = RetryConfig::WS_CONNECTED;
        let deadline = tokio::time::sleep(cfg.start_delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("HELLO not received within {:?}", cfg.start_delay);
                    self.set_state(SessionState::Gateway).await;
                    return;
                }
                event = self.control_rx.recv() => {
                    match event {
                        Some(FsmEvent::FrameReceived(frame)) => {
                            if self.handle_pre_connect_frame(frame).await {
                                return;
                            }
                        }
                        Some(FsmEvent::ReconnectSignal) => {
                            self.handle_reconnect_signal().await;
                            return;
                        }
                        Some(FsmEvent::Shutdown) => {
                            self.handle_shutdown().await;
                            return;
                        }
                        Some(FsmEvent::ReaderClosed) | None => {
                            self.set_state(SessionState::Gateway).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Returns `true` if this frame caused a state transition (the caller
    /// should stop waiting).
    async fn handle_pre_connect_frame(&mut self, frame: Frame) -> bool {
        match frame.signal_type {
            SignalType::Hello => {
                self.handle_hello(frame.payload).await;
                true
            }
            SignalType::Reconnect => {
                self.handle_reconnect_signal().await;
                true
            }
            SignalType::ResumeAck => {
                if self.current_state().await != SessionState::Connected {
                    self.set_state(SessionState::Connected).await;
                }
                true
            }
            _ => false,
        }
    }

    async fn handle_hello(&mut self, payload: Value) {
        let hello: HelloData = match serde_json::from_value(payload) {
            Ok(h) => h,
            Err(e) => {
                warn!("malformed HELLO payload: {e}");
                self.set_state(SessionState::Gateway).await;
                return;
            }
        };

        match hello.code {
            0 => {
                if let Some(session_id) = hello.session_id {
                    self.session.session_id = session_id;
                }
                if let Err(e) = self.session.save(&self.config.session_file) {
                    warn!("failed to persist session identity: {e}");
                }
                self.set_state(SessionState::Connected).await;
            }
            40100 | 40101 | 40102 | 40103 => {
                warn!("gateway rejected HELLO with code {}", hello.code);
                self.gateway_retry_override = Some(RetryConfig::HELLO_GATEWAY_ERR_OVERRIDE);
                self.set_state(SessionState::Init).await;
            }
            other => {
                warn!("HELLO failed with code {other}");
                self.set_state(SessionState::Gateway).await;
            }
        }
    }

    async fn enter_connected(&mut self) {
        self.stop_heartbeat().await;
        *self.last_pong_at.lock().await = Some(Instant::now());
        self.heartbeat = Some(heartbeat::spawn(
            self.transport.clone(),
            self.max_sn.clone(),
            self.last_pong_at.clone(),
            self.state.clone(),
            self.control_tx.clone(),
            self.config.heartbeat.clone(),
        ));

        loop {
            match self.control_rx.recv().await {
                Some(FsmEvent::FrameReceived(frame)) => {
                    if self.handle_connected_frame(frame).await {
                        return;
                    }
                }
                Some(FsmEvent::HeartbeatTimeout) => {
                    warn!("heartbeat timeout while connected");
                    self.set_state(SessionState::Retry).await;
                    return;
                }
                Some(FsmEvent::PongReceived) => {
                    *self.last_pong_at.lock().await = Some(Instant::now());
                }
                Some(FsmEvent::ReconnectSignal) => {
                    self.handle_reconnect_signal().await;
                    return;
                }
                Some(FsmEvent::Shutdown) => {
                    self.handle_shutdown().await;
                    return;
                }
                Some(FsmEvent::ReaderClosed) | None => {
                    warn!("reader closed while connected");
                    self.set_state(SessionState::Retry).await;
                    return;
                }
                Some(FsmEvent::SendNack(missing)) => self.nack(missing).await,
                _ => {}
            }
        }
    }

    /// Returns `true` if this frame triggered a reconnect (the caller
    /// should stop waiting — the state has already moved to `Init`).
    async fn handle_connected_frame(&mut self, frame: Frame) -> bool {
        match frame.signal_type {
            SignalType::Event => {
                if let Some(sn) = frame.sequence_number {
                    let mut max_sn = self.max_sn.lock().await;
                    *max_sn = (*max_sn).max(sn);
                    self.session.max_sn = *max_sn;
                    drop(max_sn);
                    if let Err(e) = self.session.save(&self.config.session_file) {
                        warn!("failed to persist session identity: {e}");
                    }
                }
                let _ = self.events_tx.send(frame);
                false
            }
            SignalType::Pong => {
                *self.last_pong_at.lock().await = Some(Instant::now());
                false
            }
            SignalType::Reconnect => {
                self.handle_reconnect_signal().await;
                true
            }
            _ => false,
        }
    }

    /// Unlike the other `enter_*` methods, this does not stop the
    /// heartbeat watcher: spec §4.7 has it keep judging deadlines while
    /// `state == Retry`, since a real PONG reply here is what lets Retry
    /// resolve back to Connected instead of always riding out the backoff
    /// to Gateway. Only the interval-driven sender is stopped; probes are
    /// sent on demand and their deadlines pushed to the same watcher.
    async fn enter_retry(&mut self) {
        if let Some(hb) = &self.heartbeat {
            hb.abort_sender();
        }

        let cfg = RetryConfig::RETRY;
        let mut attempt = 0u32;

        loop {
            self.send_ping_probe().await;

            tokio::select! {
                _ = tokio::time::sleep(cfg.delay_for_attempt(attempt)) => {
                    attempt += 1;
                    if !cfg.should_retry(attempt) {
                        self.stop_heartbeat().await;
                        self.set_state(SessionState::Gateway).await;
                        return;
                    }
                }
                event = self.control_rx.recv() => {
                    match event {
                        Some(FsmEvent::PongReceived) => {
                            self.set_state(SessionState::Connected).await;
                            return;
                        }
                        Some(FsmEvent::RetryHeartbeatTimeout) => {
                            self.stop_heartbeat().await;
                            self.set_state(SessionState::Gateway).await;
                            return;
                        }
                        Some(FsmEvent::FrameReceived(frame)) => {
                            if self.handle_connected_frame(frame).await {
                                return;
                            }
                        }
                        Some(FsmEvent::ReconnectSignal) => {
                            self.handle_reconnect_signal().await;
                            return;
                        }
                        Some(FsmEvent::Shutdown) => {
                            self.handle_shutdown().await;
                            return;
                        }
                        Some(FsmEvent::ReaderClosed) | None => {
                            self.stop_heartbeat().await;
                            self.set_state(SessionState::Gateway).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Send a probe ping directly (outside the heartbeat sender's fixed
    /// interval) and push its deadline to the heartbeat watcher so a real
    /// PONG reply can still resolve Retry back to Connected.
    async fn send_ping_probe(&self) {
        let sn = *self.max_sn.lock().await;
        let payload = json!({ "s": 2, "sn": sn });
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            let _ = self.transport.send(bytes, false).await;
        }
        if let Some(hb) = &self.heartbeat {
            let deadline = Instant::now() + self.config.heartbeat.pong_timeout;
            let _ = hb.deadline_sender().send(deadline);
        }
    }

    /// Cooperative reset to Init on a server-initiated `SIG_RECONNECT`:
    /// stop heartbeat, clear gateway URL, clear `max_sn`, clear persisted
    /// session.
    async fn handle_reconnect_signal(&mut self) {
        warn!("server requested reconnect, resetting session");
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        self.transport.close().await;
        self.gateway_url = None;
        self.session.session_id.clear();
        self.session.max_sn = 0;
        *self.max_sn.lock().await = 0;
        if let Err(e) = SessionIdentity::clear(&self.config.session_file) {
            warn!("failed to clear session file: {e}");
        }
        self.set_state(SessionState::Init).await;
    }

    /// Enqueue a NACK listing missing sequence numbers.
    pub async fn nack(&self, missing: Vec<i64>) {
        let payload = json!({ "s": 7, "d": { "sn": missing } });
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            let _ = self.transport.send(bytes, false).await;
        }
    }
}

/// Append `sn=`/`sessionId=`/`resume=1` to a gateway URL for a resumed
/// connection (spec §4.6/§6).
fn append_resume_params(base: &str, session: &SessionIdentity) -> String {
    match url::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("sn", &session.max_sn.to_string())
                .append_pair("sessionId", &session.session_id)
                .append_pair("resume", "1");
            url.to_string()
        }
        Err(e) => {
            warn!("gateway url {base} failed to parse ({e}); appending resume params raw");
            let sep = if base.contains('?') { '&' } else { '?' };
            format!(
                "{base}{sep}sn={}&sessionId={}&resume=1",
                session.max_sn, session.session_id
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_reaches_connected() {
        let mut state = SessionState::Start;
        let path = [
            FsmEvent::Start,
            FsmEvent::GotGateway("ws://x/y".to_string()),
            FsmEvent::WsConnected,
            FsmEvent::HelloReceived,
        ];
        for event in &path {
            state = apply(state, event).expect("valid transition");
        }
        assert_eq!(state, SessionState::Connected);
    }

    #[test]
    fn every_non_terminal_state_has_an_outgoing_event() {
        let all_events = [
            FsmEvent::Start,
            FsmEvent::GotGateway(String::new()),
            FsmEvent::WsConnected,
            FsmEvent::WsConnectFail,
            FsmEvent::HelloReceived,
            FsmEvent::HelloFail,
            FsmEvent::HelloGatewayErr,
            FsmEvent::PongReceived,
            FsmEvent::HeartbeatTimeout,
            FsmEvent::RetryHeartbeatTimeout,
            FsmEvent::ResumeReceivedOk,
        ];
        let states = [
            SessionState::Start,
            SessionState::Init,
            SessionState::Gateway,
            SessionState::WSConnected,
            SessionState::Connected,
            SessionState::Retry,
        ];
        for state in states {
            let has_outgoing = all_events.iter().any(|e| apply(state, e).is_some());
            assert!(has_outgoing, "{state:?} has no outgoing transition");
        }
    }

    #[test]
    fn pong_received_reconfirms_connected_from_any_liveness_state() {
        for state in [SessionState::Connected, SessionState::WSConnected, SessionState::Retry] {
            assert_eq!(apply(state, &FsmEvent::PongReceived), Some(SessionState::Connected));
        }
    }

    #[test]
    fn hello_gateway_err_returns_to_init() {
        assert_eq!(
            apply(SessionState::WSConnected, &FsmEvent::HelloGatewayErr),
            Some(SessionState::Init)
        );
    }

    #[test]
    fn resume_url_contains_exactly_one_of_each_param() {
        let session = SessionIdentity {
            session_id: "abc".to_string(),
            max_sn: 7,
        };
        let url = append_resume_params("wss://gateway.example/endpoint?v=1", &session);
        for needle in ["sn=7", "sessionId=abc", "resume=1"] {
            assert_eq!(
                url.matches(needle.split('=').next().unwrap()).count(),
                1,
                "expected exactly one `{needle}` in {url}"
            );
        }
    }

    #[test]
    fn heartbeat_timeout_escalates_through_retry_to_gateway() {
        assert_eq!(
            apply(SessionState::Connected, &FsmEvent::HeartbeatTimeout),
            Some(SessionState::Retry)
        );
        assert_eq!(
            apply(SessionState::Retry, &FsmEvent::RetryHeartbeatTimeout),
            Some(SessionState::Gateway)
        );
    }
}
