//! Socket transport behind the connector
//!
//! A [`Dialer`] opens one duplex text channel. The connector owns correlation,
//! dispatch and reconnection; the transport only moves frames.

use super::types::ConnectorError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// One open duplex connection
///
/// Dropping `outbound` closes the socket. `inbound` ends when the socket does.
pub struct WsConnection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens connections to the venue
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<WsConnection, ConnectorError>;
}

/// WebSocket dialer over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<WsConnection, ConnectorError> {
        tracing::info!(url = %url, "Connecting to WebSocket");

        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = pump(ws_stream, out_rx, in_tx).await {
                tracing::warn!(error = %e, "WebSocket pump ended with error");
            }
        });

        tracing::info!("WebSocket connected");

        Ok(WsConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Move frames between the socket and the connector until either side closes
async fn pump<S>(
    ws_stream: S,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    in_tx: mpsc::UnboundedSender<String>,
) -> Result<(), ConnectorError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(text).is_err() {
                            tracing::debug!("Connector dropped, closing socket");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match String::from_utf8(data) {
                            Ok(text) => {
                                if in_tx.send(text).is_err() {
                                    return Ok(());
                                }
                            }
                            Err(_) => tracing::debug!("Dropping non-UTF8 binary frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Received close frame");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(ConnectorError::Transport(e.to_string()));
                    }
                    None => {
                        return Err(ConnectorError::Transport("Stream ended unexpectedly".into()));
                    }
                    _ => {}
                }
            }

            msg = out_rx.recv() => {
                match msg {
                    Some(text) => {
                        write.send(Message::Text(text)).await
                            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
                    }
                    None => {
                        // Connector released the link
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
