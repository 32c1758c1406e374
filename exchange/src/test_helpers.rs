//! Scripted in-process WebSocket peer for exercising `Client` over a real socket.

use std::future::Future;
use std::time::Duration;

use envelope::{ExchangeId, Reply, Request};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{Client, ClientConfig};

/// Server side of one test connection.
pub(crate) struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    /// Next request frame from the client, or `None` once the client is gone.
    pub(crate) async fn try_recv_request(&mut self) -> Option<Request> {
        while let Some(msg) = self.ws.next().await {
            match msg.ok()? {
                Message::Binary(bytes) => {
                    return Some(envelope::decode_request(&bytes).expect("client sent bad request"));
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    pub(crate) async fn recv_request(&mut self) -> Request {
        tokio::time::timeout(Duration::from_secs(2), self.try_recv_request())
            .await
            .expect("timed out waiting for request")
            .expect("client hung up")
    }

    pub(crate) async fn reply(&mut self, id: ExchangeId, reply: Reply) {
        let bytes = envelope::encode_reply(id, &reply).expect("encode reply");
        self.send_binary(bytes).await;
    }

    pub(crate) async fn result(&mut self, id: ExchangeId, value: Value) {
        self.reply(id, Reply::Result { value, end: false }).await;
    }

    pub(crate) async fn end(&mut self, id: ExchangeId, value: Value) {
        self.reply(id, Reply::Result { value, end: true }).await;
    }

    pub(crate) async fn error(&mut self, id: ExchangeId, code: i64, message: &str) {
        self.reply(
            id,
            Reply::Error {
                code,
                message: message.to_owned(),
            },
        )
        .await;
    }

    pub(crate) async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws
            .send(Message::Binary(bytes.into()))
            .await
            .expect("peer send");
    }

    pub(crate) async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("peer send");
    }

    /// Keep reading until the client closes the connection.
    pub(crate) async fn drain_until_closed(&mut self) {
        while self.try_recv_request().await.is_some() {}
    }

    /// Start a close handshake from the server side.
    pub(crate) async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Drop the TCP connection without a close handshake.
    pub(crate) fn hang_up(self) {
        drop(self.ws);
    }
}

/// Complete the WebSocket handshake for the next client on `listener`.
pub(crate) async fn accept(listener: &TcpListener) -> Peer {
    let (tcp, _) = listener.accept().await.expect("accept");
    let ws = tokio_tungstenite::accept_async(tcp)
        .await
        .expect("websocket handshake");
    Peer { ws }
}

/// Accept one client connection and run `script` against it.
///
/// Returns the server URL and the script task; await the task to surface
/// assertion failures inside the script.
pub(crate) async fn spawn_peer<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(Peer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        script(accept(&listener).await).await;
    });
    (format!("ws://{addr}"), task)
}

/// Connected client for `url` with a short default timeout.
pub(crate) async fn connected_client(url: &str) -> Client {
    let config = ClientConfig::from_url(url)
        .expect("test url")
        .with_default_timeout(Duration::from_secs(2));
    let client = Client::new(config);
    client.connect().await.expect("connect");
    client
}
