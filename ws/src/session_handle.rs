//! `GatewaySession`: wires discovery, transport, FSM, and heartbeat
//! together behind a small handle. Not itself a spec component — glue the
//! application layer would otherwise have to write (spec §4.9).

use tokio::sync::mpsc;
use wavelink_rest::Rest;
use wavelink_types::Frame;

use crate::config::GatewayConfig;
use crate::discovery::GatewayDiscovery;
use crate::fsm::Fsm;
use crate::transport::Transport;

/// A running gateway session. Drop (or call [`GatewaySession::shutdown`])
/// to stop the underlying FSM task.
pub struct GatewaySession {
    events_rx: mpsc::UnboundedReceiver<Frame>,
    control_tx: mpsc::UnboundedSender<crate::fsm::FsmEvent>,
    driver: tokio::task::JoinHandle<()>,
    sigint_handle: tokio::task::JoinHandle<()>,
}

impl GatewaySession {
    /// Build a `Rest` client from `config`, start the FSM driver task, and
    /// return a handle exposing the event stream and outbound operations.
    /// Also starts a task that calls [`shutdown`](Self::shutdown)'s
    /// normal-closure path on SIGINT (spec §6 Exit).
    pub async fn start(config: GatewayConfig) -> Self {
        let rest_options = wavelink_rest::RestOptions {
            api_url: config.api_base_url.clone(),
            ..wavelink_rest::RestOptions::default()
        };
        let rest = Rest::new(rest_options);
        rest.set_token(config.token.clone()).await;

        let discovery = GatewayDiscovery::new(rest);
        let transport = Transport::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let fsm = Fsm::new(config, discovery, transport, events_tx);
        let control_tx = fsm.control_sender();
        let driver = tokio::spawn(fsm.run());

        let sigint_tx = control_tx.clone();
        let sigint_handle = tokio::spawn(async move {
            wait_for_sigint().await;
            let _ = sigint_tx.send(crate::fsm::FsmEvent::Shutdown);
        });

        Self {
            events_rx,
            control_tx,
            driver,
            sigint_handle,
        }
    }

    /// The channel of delivered EVENT frames (and any other signal an
    /// application wants to observe — HELLO/PONG are consumed internally).
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<Frame> {
        &mut self.events_rx
    }

    /// Ask the FSM to send a NACK for the given missing sequence numbers.
    /// Only has effect while the FSM is in `Connected`; dropped otherwise.
    pub fn nack(&self, missing: Vec<i64>) {
        let _ = self.control_tx.send(crate::fsm::FsmEvent::SendNack(missing));
    }

    /// Request a graceful exit: the FSM sends a normal-closure frame over
    /// the open websocket, stops its heartbeat and reader, and the driver
    /// task then returns on its own (spec §6 Exit, §5 Cancellation). Waits
    /// for the driver to finish rather than aborting it mid-send.
    pub async fn shutdown(self) {
        self.sigint_handle.abort();
        let _ = self.control_tx.send(crate::fsm::FsmEvent::Shutdown);
        let _ = self.driver.await;
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.sigint_handle.abort();
        self.driver.abort();
    }
}

/// Listens for SIGINT and returns once received, for callers that want to
/// drive a graceful shutdown (spec §6 Exit).
pub async fn wait_for_sigint() {
    let _ = tokio::signal::ctrl_c().await;
}
