//! Gateway connection lifecycle: dial, handshake, keepalive, dispatch,
//! reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};

use crate::frame::{self, Frame};
use crate::reconnect::ReconnectBackoff;

/// Supplies a fresh JWT for the Socket.IO CONNECT frame. Every reconnect
/// attempt re-authenticates from scratch through this source.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Receives decoded gateway events. Implementations must not block: hand the
/// event off to a queue and return, or PING/PONG processing starves and the
/// server drops the socket.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: GatewayEvent, emit: EmitHandle) -> Result<()>;
}

/// One decoded `42[name, payload]` event.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Clonable handle for upstream emission. All writes funnel through a single
/// writer task, which serializes the write path.
#[derive(Clone)]
pub struct EmitHandle {
    tx: mpsc::Sender<Message>,
}

impl EmitHandle {
    pub async fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<()> {
        let text = frame::emit_frame(event, payload)?;
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| Error::Gateway("gateway writer closed".into()))
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub handshake_timeout: Duration,
    /// Server PING arrives every ~25 s; a silent minute means the link died.
    pub read_timeout: Duration,
    pub backoff: ReconnectBackoff,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            backoff: ReconnectBackoff::default(),
        }
    }
}

/// Single connection lifecycle: dial, handshake, read loop.
///
/// Returns `Ok(true)` when the Socket.IO CONNECT was acknowledged before the
/// connection ended gracefully, `Ok(false)` when it closed earlier.
pub async fn run_gateway_once(
    cancel: &CancellationToken,
    ws_url: &str,
    tokens: &dyn TokenSource,
    sink: &Arc<dyn EventSink>,
    opts: &GatewayOptions,
) -> Result<bool> {
    let connect = tokio_tungstenite::connect_async(ws_url);
    let (ws, _resp) = tokio::select! {
        res = tokio::time::timeout(opts.handshake_timeout, connect) => match res {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(Error::Gateway(format!("dial failed: {e}"))),
            Err(_) => return Err(Error::Gateway("dial timeout".into())),
        },
        _ = cancel.cancelled() => return Err(Error::Cancelled),
    };

    let (mut ws_sink, mut ws_stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
    let emit = EmitHandle { tx: outbound_tx.clone() };

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    let mut handshake_completed = false;
    let result: Result<()> = 'conn: loop {
        let next = tokio::select! {
            next = tokio::time::timeout(opts.read_timeout, ws_stream.next()) => next,
            _ = cancel.cancelled() => break Err(Error::Cancelled),
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => break Err(Error::Gateway(format!("read failed: {e}"))),
            Ok(None) => break Ok(()),
            Err(_) => break Err(Error::Gateway("read deadline exceeded (missed ping)".into())),
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break Ok(()),
            Message::Ping(data) => {
                let _ = outbound_tx.send(Message::Pong(data)).await;
                continue;
            }
            _ => continue,
        };

        for raw in frame::split_frames(&text) {
            match frame::parse_frame(raw) {
                Ok(Frame::Open) => {
                    let token = match tokens.token().await {
                        Ok(t) => t,
                        Err(e) => break 'conn Err(e),
                    };
                    let _ = outbound_tx
                        .send(Message::Text(frame::connect_frame(&token).into()))
                        .await;
                }
                Ok(Frame::Ping) => {
                    let _ = outbound_tx.send(Message::Text("3".to_owned().into())).await;
                }
                Ok(Frame::Pong) => {}
                Ok(Frame::ConnectAck) => {
                    handshake_completed = true;
                    tracing::debug!("gateway connect acknowledged");
                }
                Ok(Frame::Close) => {
                    break 'conn Err(Error::Gateway("engine.io close".into()));
                }
                Ok(Frame::SocketError(body)) => {
                    break 'conn Err(Error::Gateway(format!("socket.io error: {body}")));
                }
                Ok(Frame::Event { name, payload }) => {
                    let event = GatewayEvent { name, payload };
                    if let Err(e) = sink.on_event(event, emit.clone()).await {
                        break 'conn Err(e);
                    }
                }
                Ok(Frame::Other(_)) => {}
                Err(e) => break 'conn Err(e),
            }
        }
    };

    drop(emit);
    drop(outbound_tx);
    writer_task.abort();
    result.map(|()| handshake_completed)
}

/// Run the gateway until cancelled, reconnecting with exponential backoff.
///
/// The attempt counter resets only after a completed handshake, so a server
/// that accepts TCP but rejects auth still backs off properly.
pub async fn run_gateway(
    cancel: &CancellationToken,
    ws_url: &str,
    tokens: &dyn TokenSource,
    sink: Arc<dyn EventSink>,
    opts: &GatewayOptions,
) -> Result<()> {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome = run_gateway_once(cancel, ws_url, tokens, &sink, opts).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match outcome {
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Ok(handshake_completed) => {
                tracing::info!(handshake_completed, "gateway connection closed");
                if handshake_completed {
                    attempt = 0;
                }
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "gateway connection lost");
            }
        }

        let delay = opts.backoff.delay_for_attempt(attempt);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = attempt + 1,
            "gateway reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        attempt = attempt.saturating_add(1);
    }
}
