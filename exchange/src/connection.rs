//! Connection task, the sole owner of the socket and the correlation table.
//!
//! LIFECYCLE
//! =========
//! 1. `Client::connect` opens the socket and spawns [`run`]
//! 2. Loop: commands from callers, inbound frames, and deadline ticks are
//!    handled one at a time in a `select!`
//! 3. End: user close, server hangup, transport error, or every client
//!    handle dropped. All four settle outstanding exchanges the same way;
//!    only the unsolicited ones invoke the close handler.

use std::sync::Arc;
use std::time::Duration;

use envelope::{ExchangeId, Request};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, IdSeed, Waiter};
use crate::error::RpcError;

/// Invoked with a diagnostic message when the server side ends the connection.
pub type CloseHandler = Arc<dyn Fn(String) + Send + Sync>;

pub(crate) const CLOSED_BY_SERVER: &str = "Connection closed by server";

/// Requests from client handles to the connection task.
pub(crate) enum Command {
    /// Register an exchange, then send its request.
    Open {
        method: String,
        params: Value,
        timeout: Duration,
        waiter: Waiter,
        opened: oneshot::Sender<ExchangeId>,
    },
    /// Send a request with no table entry; replies are dropped.
    Notify {
        method: String,
        params: Value,
        sent: oneshot::Sender<Result<ExchangeId, RpcError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

enum Ending {
    User(oneshot::Sender<()>),
    Unsolicited(String),
    Dropped,
}

/// Drive one connection until it ends.
pub(crate) async fn run<S>(
    mut socket: WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    seed: Arc<IdSeed>,
    on_close: Option<CloseHandler>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut dispatcher = Dispatcher::default();

    let ending = loop {
        let deadline = dispatcher.next_deadline();
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break Ending::Dropped };
                match cmd {
                    Command::Open { method, params, timeout, waiter, opened } => {
                        let id = seed.next();
                        if dispatcher.register(id, timeout, waiter, Instant::now()).is_err() {
                            let _ = opened.send(id);
                            continue;
                        }
                        let written = send_request(&mut socket, Request::new(id, method, params)).await;
                        let _ = opened.send(id);
                        if let Err(e) = written {
                            dispatcher.fail(id, e.clone());
                            if let RpcError::Connection(reason) = e {
                                break Ending::Unsolicited(reason);
                            }
                        }
                    }
                    Command::Notify { method, params, sent } => {
                        let id = seed.next();
                        let written = send_request(&mut socket, Request::new(id, method, params)).await;
                        let broken = match &written {
                            Err(RpcError::Connection(reason)) => Some(reason.clone()),
                            _ => None,
                        };
                        let _ = sent.send(written.map(|()| id));
                        if let Some(reason) = broken {
                            break Ending::Unsolicited(reason);
                        }
                    }
                    Command::Close { done } => break Ending::User(done),
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => dispatcher.route_frame(&bytes, Instant::now()),
                    Some(Ok(Message::Text(_))) => debug!("ignoring text frame"),
                    Some(Ok(Message::Close(_))) | None => break Ending::Unsolicited(CLOSED_BY_SERVER.to_owned()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport receive failed");
                        break Ending::Unsolicited(format!("Transport error: {e}"));
                    }
                }
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                dispatcher.expire(Instant::now());
            }
        }
    };

    // Nothing new can be queued once the receiver is closed; whatever is
    // already queued is settled as closed along with the table.
    commands.close();
    dispatcher.close_all(&RpcError::ConnectionClosed);
    let mut late_closes = Vec::new();
    while let Ok(cmd) = commands.try_recv() {
        match cmd {
            Command::Open { waiter, .. } => waiter.fail(RpcError::ConnectionClosed),
            Command::Notify { sent, .. } => {
                let _ = sent.send(Err(RpcError::ConnectionClosed));
            }
            Command::Close { done } => late_closes.push(done),
        }
    }

    let _ = socket.close(None).await;

    match ending {
        Ending::User(done) => {
            info!("connection closed by client");
            let _ = done.send(());
        }
        Ending::Unsolicited(reason) => {
            info!(%reason, "connection ended");
            if let Some(handler) = on_close {
                handler(reason);
            }
        }
        Ending::Dropped => debug!("all client handles dropped; connection closed"),
    }
    for done in late_closes {
        let _ = done.send(());
    }
}

/// Serialize and write one request frame.
async fn send_request<S>(socket: &mut WebSocketStream<S>, request: Request) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = envelope::encode_request(&request).map_err(|e| RpcError::Encode(e.to_string()))?;
    debug!(id = request.id, method = %request.method, "send request");
    socket
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| RpcError::Connection(e.to_string()))
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
