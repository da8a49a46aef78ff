//! Websocket transport: client side of the presence relay.
//!
//! DESIGN
//! ======
//! Each `connect` opens one socket to `<base>?topic=<name>&key=<uuid>`. The
//! write half sits behind an async mutex for `track`; a reader task decodes
//! relay messages into `TransportEvent`s. When the socket ends without a
//! local `close`, the reader reports `Closed` so the channel can move to its
//! terminal state.
//!
//! ERROR HANDLING
//! ==============
//! Undecodable messages are logged and skipped. Socket errors end the reader
//! with a `Closed` event carrying the error text.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent, TransportHandle};
use crate::error::PresenceError;
use crate::record::{ParticipantId, PresenceRecord};
use crate::wire;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the relay endpoint, e.g. `ws://127.0.0.1:4000/presence`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    #[must_use]
    pub fn connect_url(&self, topic: &str, presence_key: ParticipantId) -> String {
        format!("{}?topic={topic}&key={presence_key}", self.base_url)
    }
}

struct WsHandle {
    topic: String,
    sink: Mutex<SplitSink<Socket, Message>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        topic: &str,
        presence_key: ParticipantId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, PresenceError> {
        let url = self.connect_url(topic, presence_key);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| PresenceError::Connection { topic: topic.to_string(), reason: e.to_string() })?;
        info!(topic, participant = %presence_key, "ws transport connected");

        let (sink, stream) = socket.split();
        let reader = tokio::spawn(read_events(topic.to_string(), stream, events));
        Ok(Box::new(WsHandle {
            topic: topic.to_string(),
            sink: Mutex::new(sink),
            reader: StdMutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait::async_trait]
impl TransportHandle for WsHandle {
    async fn track(&self, record: PresenceRecord) -> Result<(), PresenceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PresenceError::Publish { topic: self.topic.clone(), reason: "socket closed".into() });
        }
        let bytes = wire::encode_track(record);
        self.sink
            .lock()
            .await
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| PresenceError::Publish { topic: self.topic.clone(), reason: e.to_string() })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(topic = %self.topic, error = %e, "ws close handshake failed");
        }
        info!(topic = %self.topic, "ws transport closed");
    }
}

async fn read_events(topic: String, mut stream: SplitStream<Socket>, events: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        let Some(msg) = stream.next().await else {
            break "socket ended".to_string();
        };
        match msg {
            Ok(Message::Binary(bytes)) => match wire::decode_event(&bytes) {
                Ok(TransportEvent::Closed { reason }) => break reason,
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(%topic, error = %e, "undecodable relay message skipped"),
            },
            Ok(Message::Close(_)) => break "closed by relay".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    warn!(%topic, %reason, "ws transport lost");
    if events.send(TransportEvent::Closed { reason }).await.is_err() {
        debug!(%topic, "event queue gone before close was reported");
    }
}
