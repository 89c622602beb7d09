//! `tokio-tungstenite` implementation of [`Connector`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pulse_core::{ConnectionConfig, SocketError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::transport::{Connector, OpenedTransport, OutboundFrame, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default number of inbound events buffered per socket.
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Opens real WebSocket connections.
#[derive(Clone, Debug)]
pub struct WsConnector {
    inbound_buffer: usize,
}

impl WsConnector {
    /// Create a connector with the default inbound buffer.
    pub fn new() -> Self {
        Self {
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }

    /// Override the number of inbound events buffered per socket.
    #[must_use]
    pub fn with_inbound_buffer(mut self, inbound_buffer: usize) -> Self {
        self.inbound_buffer = inbound_buffer.max(1);
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        config: &ConnectionConfig,
        outbound_buffer: usize,
    ) -> Result<OpenedTransport, SocketError> {
        let request = build_request(config)?;
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| SocketError::connect(&config.url, e))?;
        info!(
            connection_id = %config.id,
            url = %config.url,
            status = %response.status(),
            "websocket handshake complete"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_buffer);
        drop(tokio::spawn(pump(
            config.id.clone(),
            stream,
            outbound_rx,
            inbound_tx,
        )));

        Ok(OpenedTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Build the handshake request, offering any configured sub-protocols.
pub fn build_request(config: &ConnectionConfig) -> Result<Request, SocketError> {
    let mut request =
        config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::InvalidUrl {
                url: config.url.clone(),
                message: e.to_string(),
            })?;
    if !config.protocols.is_empty() {
        let offered = config.protocols.join(", ");
        let value = HeaderValue::from_str(&offered)
            .map_err(|_| SocketError::InvalidProtocol(offered.clone()))?;
        let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    Ok(request)
}

/// Shuttle frames between the socket and the registry's channels until
/// either side goes away.
async fn pump(
    connection_id: String,
    stream: WsStream,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    inbound: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(connection_id = %connection_id, "outbound channel dropped, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return;
                };
                let message = match frame {
                    OutboundFrame::Text(text) => Message::Text(text.into()),
                    OutboundFrame::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(connection_id = %connection_id, error = %e, "websocket write failed");
                    let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                    break Some(e.to_string());
                }
            }
            message = source.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!(connection_id = %connection_id, len = bytes.len(), "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => break frame.as_ref().map(describe_close),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "websocket read failed");
                        let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                        break Some(e.to_string());
                    }
                    None => break None,
                };
                if inbound.send(event).await.is_err() {
                    // Registry stopped listening; dropping the stream closes it.
                    return;
                }
            }
        }
    };

    debug!(connection_id = %connection_id, reason = ?reason, "websocket closed");
    let _ = inbound.send(TransportEvent::Closed(reason)).await;
}

fn describe_close(frame: &CloseFrame) -> String {
    let code = u16::from(frame.code);
    if frame.reason.is_empty() {
        code.to_string()
    } else {
        format!("{code} {}", frame.reason.as_str())
    }
}
