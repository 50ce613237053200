//! Transport (spec §4.5): a websocket connection with a single-writer lock.
//! The reader loop lives with the caller (the FSM driver), not here — this
//! type only dials, serializes writes, and closes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::error::{GatewayError, StateError, TransportError};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type Reader = SplitStream<Ws>;

/// Quiescence period observed before re-dialing, letting the server release
/// resources held by the previous connection.
const DIAL_QUIESCENCE: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct Transport {
    write: Arc<Mutex<Option<SplitSink<Ws, Message>>>>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            write: Arc::new(Mutex::new(None)),
        }
    }

    /// Close any existing connection, wait the quiescence period, then
    /// dial. Returns the read half for the caller to drive.
    pub async fn connect(&self, url: &str) -> Result<Reader, GatewayError> {
        self.close().await;
        tokio::time::sleep(DIAL_QUIESCENCE).await;

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
            url,
            None,
            false,
            Some(Connector::NativeTls(connector)),
        )
        .await
        .map_err(|e| TransportError::Dial(e.to_string()))?;

        let (write, read) = stream.split();
        let mut guard = self.write.lock().await;
        *guard = Some(write);
        Ok(read)
    }

    /// Serialize a send against the single-writer lock.
    pub async fn send(&self, bytes: Vec<u8>, binary: bool) -> Result<(), GatewayError> {
        use futures_util::SinkExt;

        let mut guard = self.write.lock().await;
        let write = guard.as_mut().ok_or(StateError::NotOpen)?;
        let message = if binary {
            Message::Binary(bytes.into())
        } else {
            Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
        };
        write
            .send(message)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;
        Ok(())
    }

    /// Close the current connection, if any, without specifying a close
    /// code — used when tearing down for a redial, where the code doesn't
    /// matter to either side.
    pub async fn close(&self) {
        use futures_util::SinkExt;

        let mut guard = self.write.lock().await;
        if let Some(mut write) = guard.take() {
            let _ = write.close().await;
        }
    }

    /// Close with an explicit normal-closure frame (spec §6 Exit, §5
    /// Cancellation): send `Close(Normal)` before closing the sink, rather
    /// than just dropping it.
    pub async fn close_normal(&self) {
        use futures_util::SinkExt;

        let mut guard = self.write.lock().await;
        if let Some(mut write) = guard.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = write.send(Message::Close(Some(frame))).await;
            let _ = write.close().await;
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
