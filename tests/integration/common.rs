//! Local WebSocket server in front of the paper venue

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tickbot::config::PaperConfig;
use tickbot::execution::PaperVenue;
use tickbot::ws::{Connector, ConnectorConfig};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct LocalVenue {
    pub venue: PaperVenue,
    pub url: String,
    server: JoinHandle<()>,
}

impl Drop for LocalVenue {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl LocalVenue {
    /// Paper venue without a ticker; tests drive ticks by hand
    pub async fn start() -> Self {
        let venue = PaperVenue::new(PaperConfig {
            tick_interval_ms: 0,
            seed: Some(11),
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let served = venue.clone();
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let venue = served.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    bridge(venue, ws).await;
                });
            }
        });

        Self { venue, url, server }
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig::new(self.url.clone())
            .api_token("integration-token")
            .request_timeout(Duration::from_secs(2))
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(50))
            .jitter(Duration::from_millis(5))
            .max_reconnects(5)
            .ping_interval(Duration::from_secs(3600))
            .silence_window(Duration::from_secs(3600))
    }

    pub async fn connect(&self) -> Connector {
        let connector = Connector::new(self.connector_config());
        connector.connect().await.unwrap();
        connector
    }
}

/// Shuttle frames between one socket and one venue connection
async fn bridge<S>(venue: PaperVenue, ws: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let serving = tokio::spawn(async move { venue.serve(in_rx, out_tx).await });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if in_tx.send(text).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            reply = out_rx.recv() => match reply {
                Some(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Venue side closed the connection
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    drop(in_tx);
    let _ = serving.await;
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}
