//! Streaming WebSocket adapter.
//!
//! Connects to push feeds (P2PQuake and similar), hands every text frame to
//! the parser chain, and reconnects forever. Rate-limit responses during
//! the handshake put the adapter into a ten-minute cool-off instead of a
//! reconnect loop.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::AdapterContext;
use crate::parsers::Payload;
use crate::runtime::worker;

/// Reconnect delay after an orderly close or read error.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Cool-off after the server says we are too much.
pub const RATE_LIMIT_COOLOFF: Duration = Duration::from_secs(600);
/// Items parsed out of a single frame.
const FRAME_LIMIT: usize = 4;

/// HTTP statuses that mean "go away for a while".
const RATE_LIMIT_STATUSES: &[u16] = &[420, 429, 406];

pub struct WebSocketAdapter {
    resource: String,
}

impl WebSocketAdapter {
    pub fn new(resource: String) -> Self {
        Self { resource }
    }

    pub async fn run(self, ctx: AdapterContext, cancel: CancellationToken) {
        let provider = format!("websocket:{}", self.resource);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let connection = tokio::select! {
                conn = connect_async(&self.resource) => conn,
                () = cancel.cancelled() => break,
            };

            let (mut stream, _response) = match connection {
                Ok(ok) => ok,
                Err(WsError::Http(response))
                    if RATE_LIMIT_STATUSES.contains(&response.status().as_u16()) =>
                {
                    warn!(
                        resource = self.resource,
                        status = response.status().as_u16(),
                        "rate limited, cooling off"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(RATE_LIMIT_COOLOFF) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    debug!(resource = self.resource, error = %e, "connect failed");
                    tokio::select! {
                        () = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
            };

            info!(resource = self.resource, "websocket connected");

            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    () = cancel.cancelled() => return,
                };

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let payload = Payload::Text(text);
                        match ctx.parser.parse(&payload, FRAME_LIMIT) {
                            Ok(reports) => {
                                for report in reports {
                                    // Streaming producers drop when the
                                    // pipeline is full; they must not stall
                                    // the socket.
                                    worker::offer(
                                        &ctx.reports,
                                        (report, provider.clone()),
                                        "fusion",
                                    );
                                }
                            }
                            Err(rejection) => {
                                debug!(reason = %rejection, "frame not parsable");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = stream.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(resource = self.resource, "websocket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(resource = self.resource, error = %e, "websocket error");
                        break;
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(RECONNECT_DELAY) => {}
                () = cancel.cancelled() => break,
            }
        }

        info!(resource = self.resource, "websocket adapter stopped");
    }
}
