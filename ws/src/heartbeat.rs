//! Heartbeat Supervisor (spec §4.7): a sender task and a pong-timeout
//! watcher task, cooperating over a channel of deadlines rather than one
//! task owning both a cron and a channel.

use std::time::Instant;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::HeartbeatConfig;
use crate::fsm::{FsmEvent, SessionState};
use crate::transport::Transport;
use std::sync::Arc;

pub struct HeartbeatHandles {
    sender: JoinHandle<()>,
    watcher: JoinHandle<()>,
    deadline_tx: mpsc::UnboundedSender<Instant>,
}

impl HeartbeatHandles {
    pub fn abort(&self) {
        self.sender.abort();
        self.watcher.abort();
    }

    /// Stop the interval-driven sender while leaving the watcher running.
    /// Used entering Retry, where pings are sent on demand by explicit
    /// probes rather than on the regular heartbeat interval, but deadlines
    /// from those probes still need a watcher to judge them.
    pub fn abort_sender(&self) {
        self.sender.abort();
    }

    /// A sender for pushing a deadline for a probe sent outside the
    /// interval-driven sender loop (Retry's on-demand pings).
    pub fn deadline_sender(&self) -> mpsc::UnboundedSender<Instant> {
        self.deadline_tx.clone()
    }
}

/// Spawn the sender and watcher tasks. `last_pong_at` and `max_sn` are
/// shared with the FSM task, which updates `last_pong_at` whenever a PONG
/// frame is observed and reads `max_sn` for its own bookkeeping.
pub fn spawn(
    transport: Transport,
    max_sn: Arc<Mutex<i64>>,
    last_pong_at: Arc<Mutex<Option<Instant>>>,
    fsm_state: Arc<Mutex<SessionState>>,
    control_tx: mpsc::UnboundedSender<FsmEvent>,
    config: HeartbeatConfig,
) -> HeartbeatHandles {
    let (deadline_tx, deadline_rx) = mpsc::unbounded_channel::<Instant>();

    let sender = tokio::spawn(run_sender(
        transport,
        max_sn,
        deadline_tx.clone(),
        config.clone(),
    ));
    let watcher = tokio::spawn(run_watcher(
        fsm_state,
        last_pong_at,
        deadline_rx,
        control_tx,
        config,
    ));

    HeartbeatHandles {
        sender,
        watcher,
        deadline_tx,
    }
}

async fn run_sender(
    transport: Transport,
    max_sn: Arc<Mutex<i64>>,
    deadline_tx: mpsc::UnboundedSender<Instant>,
    config: HeartbeatConfig,
) {
    let mut tick = tokio::time::interval(config.interval);
    tick.tick().await; // first tick fires immediately; skip it.

    loop {
        tick.tick().await;
        let sn = *max_sn.lock().await;
        let payload = json!({ "s": 2, "sn": sn });
        let now = Instant::now();

        let Ok(bytes) = serde_json::to_vec(&payload) else {
            continue;
        };

        if transport.send(bytes, false).await.is_err() {
            debug!("heartbeat send failed, injecting expired pong deadline");
            let _ = deadline_tx.send(now - config.pong_timeout);
            continue;
        }

        let _ = deadline_tx.send(now + config.pong_timeout);
    }
}

async fn run_watcher(
    fsm_state: Arc<Mutex<SessionState>>,
    last_pong_at: Arc<Mutex<Option<Instant>>>,
    mut deadline_rx: mpsc::UnboundedReceiver<Instant>,
    control_tx: mpsc::UnboundedSender<FsmEvent>,
    config: HeartbeatConfig,
) {
    while let Some(deadline) = deadline_rx.recv().await {
        let last_ping_at = deadline - config.pong_timeout;
        let wake_at = deadline + config.watcher_grace;
        let now = Instant::now();
        if wake_at > now {
            tokio::time::sleep(wake_at - now).await;
        }

        let state = *fsm_state.lock().await;
        if !matches!(state, SessionState::Connected | SessionState::Retry) {
            continue;
        }

        let pong_at = *last_pong_at.lock().await;
        let missed = match pong_at {
            Some(p) => p < last_ping_at,
            None => true,
        };

        let event = if missed {
            match state {
                SessionState::Connected => FsmEvent::HeartbeatTimeout,
                SessionState::Retry => FsmEvent::RetryHeartbeatTimeout,
                _ => continue,
            }
        } else {
            FsmEvent::PongReceived
        };

        let _ = control_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_dispatches_heartbeat_timeout_when_pong_missed() {
        let fsm_state = Arc::new(Mutex::new(SessionState::Connected));
        let last_pong_at = Arc::new(Mutex::new(None));
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();

        let config = HeartbeatConfig {
            interval: std::time::Duration::from_millis(10),
            pong_timeout: std::time::Duration::from_millis(5),
            watcher_grace: std::time::Duration::from_millis(5),
        };

        let watcher = tokio::spawn(run_watcher(
            fsm_state,
            last_pong_at,
            deadline_rx,
            control_tx,
            config.clone(),
        ));

        deadline_tx
            .send(Instant::now() + config.pong_timeout)
            .unwrap();
        drop(deadline_tx);

        let event = control_rx.recv().await.expect("event");
        assert!(matches!(event, FsmEvent::HeartbeatTimeout));
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn watcher_discards_deadlines_outside_connected_or_retry() {
        let fsm_state = Arc::new(Mutex::new(SessionState::Gateway));
        let last_pong_at = Arc::new(Mutex::new(None));
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();

        let config = HeartbeatConfig {
            interval: std::time::Duration::from_millis(10),
            pong_timeout: std::time::Duration::from_millis(1),
            watcher_grace: std::time::Duration::from_millis(1),
        };

        let watcher = tokio::spawn(run_watcher(
            fsm_state,
            last_pong_at,
            deadline_rx,
            control_tx,
            config.clone(),
        ));

        deadline_tx
            .send(Instant::now() + config.pong_timeout)
            .unwrap();
        drop(deadline_tx);

        watcher.await.unwrap();
        assert!(control_rx.try_recv().is_err());
    }
}
