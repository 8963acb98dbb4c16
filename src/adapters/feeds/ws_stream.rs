//! WebSocket Stream Source - JSON Streaming Primary
//!
//! `PrimarySource` over a JSON WebSocket feed. Subscriptions are
//! sent as bare tickers; messages are tagged by `type`:
//!
//! ```text
//! {"type":"trade","symbol":"AAPL","price":187.25,"size":100,"ts":1709303400000}
//! {"type":"quote","symbol":"AAPL","bid":187.2,"ask":187.3,"bid_size":3,"ask_size":5,"ts":...}
//! {"type":"bar","symbol":"AAPL","close":187.25,"volume":12000,"end":...}
//! {"type":"heartbeat"}
//! ```
//!
//! Control frames and unknown message types are skipped.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::domain::tick::bare_ticker;
use crate::ports::SourceError;
use crate::ports::primary_source::{PrimarySource, RawMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscription control message.
#[derive(Serialize)]
struct ControlMsg<'a> {
    action: &'static str,
    symbols: Vec<&'a str>,
}

/// Inbound feed message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMsg {
    Trade {
        symbol: String,
        price: f64,
        #[serde(default)]
        size: Option<f64>,
        ts: i64,
    },
    Quote {
        symbol: String,
        bid: f64,
        ask: f64,
        #[serde(default)]
        bid_size: Option<f64>,
        #[serde(default)]
        ask_size: Option<f64>,
        ts: i64,
    },
    Bar {
        symbol: String,
        close: f64,
        #[serde(default)]
        volume: Option<f64>,
        end: i64,
    },
    Heartbeat,
    #[serde(other)]
    Other,
}

impl WireMsg {
    fn into_raw(self) -> Option<RawMessage> {
        Some(match self {
            Self::Trade {
                symbol,
                price,
                size,
                ts,
            } => RawMessage::Trade {
                symbol,
                price,
                size,
                timestamp_ms: ts,
            },
            Self::Quote {
                symbol,
                bid,
                ask,
                bid_size,
                ask_size,
                ts,
            } => RawMessage::Quote {
                symbol,
                bid,
                ask,
                bid_size,
                ask_size,
                timestamp_ms: ts,
            },
            Self::Bar {
                symbol,
                close,
                volume,
                end,
            } => RawMessage::Bar {
                symbol,
                close,
                volume,
                end_ms: end,
            },
            Self::Heartbeat => RawMessage::Heartbeat,
            Self::Other => return None,
        })
    }
}

/// Parse one text frame. `Ok(None)` for message types this feed ignores.
fn parse_frame(text: &str) -> Result<Option<RawMessage>, SourceError> {
    let msg: WireMsg =
        serde_json::from_str(text).map_err(|e| SourceError::Malformed(e.to_string()))?;
    Ok(msg.into_raw())
}

/// JSON WebSocket streaming source.
pub struct WsStreamSource {
    /// WebSocket URL.
    url: String,
    /// Open connection, if any.
    stream: Option<WsStream>,
    /// Venue-qualified symbols subscribed upstream.
    subscribed: BTreeSet<String>,
}

impl WsStreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            subscribed: BTreeSet::new(),
        }
    }

    async fn send_control<'a, I>(&mut self, action: &'static str, symbols: I) -> Result<(), SourceError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let symbols: Vec<&str> = symbols.into_iter().map(|s| bare_ticker(s)).collect();
        if symbols.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_string(&ControlMsg { action, symbols })
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;
        let ws = self.stream.as_mut().ok_or(SourceError::NotConnected)?;
        ws.send(Message::Text(body))
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl PrimarySource for WsStreamSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.disconnect().await;

        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        self.stream = Some(ws);
        info!(url = %self.url, "WebSocket connected");

        // A fresh connection carries no subscriptions.
        let previous = std::mem::take(&mut self.subscribed);
        let symbols: Vec<String> = previous.into_iter().collect();
        self.subscribe(&symbols).await
    }

    async fn disconnect(&mut self) {
        if let Some(mut ws) = self.stream.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "WebSocket close failed");
            }
        }
    }

    async fn subscribe(&mut self, symbols: &[String]) -> Result<(), SourceError> {
        let wanted: BTreeSet<String> = symbols.iter().cloned().collect();
        let removed: Vec<String> = self.subscribed.difference(&wanted).cloned().collect();
        let added: Vec<String> = wanted.difference(&self.subscribed).cloned().collect();

        self.send_control("unsubscribe", &removed).await?;
        self.send_control("subscribe", &added).await?;
        self.subscribed = wanted;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
        loop {
            let ws = self.stream.as_mut().ok_or(SourceError::NotConnected)?;
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(raw) = parse_frame(&text)? {
                        return Ok(Some(raw));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket close frame received");
                    self.stream = None;
                    return Ok(None);
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(SourceError::Transport(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }
}
