//! Public client handle: connection lifecycle plus the call surface.
//!
//! A [`Client`] is an explicit value; share it by reference across concurrent
//! calls. Every call turns into a [`Command`] for the connection task, which
//! assigns the id, registers the exchange, and writes the frame. Callers then
//! wait on their own oneshot or stream queue and never touch shared state.

use std::sync::Arc;
use std::time::Duration;

use envelope::ExchangeId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::info;

use crate::config::ClientConfig;
use crate::connection::{self, CloseHandler, Command};
use crate::dispatch::{IdSeed, Waiter};
use crate::error::RpcError;
use crate::stream::CallStream;

/// Handle to one multiplexed server connection.
pub struct Client {
    config: ClientConfig,
    on_close: Option<CloseHandler>,
    seed: Arc<IdSeed>,
    link: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl Client {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            on_close: None,
            seed: Arc::new(IdSeed::default()),
            link: Mutex::new(None),
        }
    }

    /// Register the handler for connections ended by the server or transport.
    ///
    /// It receives a diagnostic message and is not called for [`Client::close`].
    #[must_use]
    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a connection is currently open.
    pub async fn is_open(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Open the transport and start the connection task.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AlreadyConnected`] if a connection is open, or
    /// [`RpcError::Connection`] if the WebSocket handshake fails.
    pub async fn connect(&self) -> Result<(), RpcError> {
        let mut link = self.link.lock().await;
        if link.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(RpcError::AlreadyConnected);
        }

        let (socket, _) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(connection::run(
            socket,
            rx,
            Arc::clone(&self.seed),
            self.on_close.clone(),
        ));
        *link = Some(tx);

        info!(url = %self.config.url, "connected");
        Ok(())
    }

    /// Close the transport and settle every outstanding exchange with
    /// [`RpcError::ConnectionClosed`]. A no-op when already closed.
    pub async fn close(&self) {
        let Some(tx) = self.link.lock().await.take() else {
            return;
        };
        let (done, closed) = oneshot::channel();
        if tx.send(Command::Close { done }).is_ok() {
            let _ = closed.await;
        }
    }

    /// Send a request without waiting for, or tracking, any reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NotConnected`] without an open transport,
    /// [`RpcError::Encode`] for unserializable params, or
    /// [`RpcError::Connection`] if the frame write fails.
    pub async fn send_request(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<ExchangeId, RpcError> {
        let params = to_params(params)?;
        let (sent, ack) = oneshot::channel();
        self.submit(Command::Notify {
            method: method.to_owned(),
            params,
            sent,
        })
        .await?;
        ack.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Fire-and-forget notification. Any server reply is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`Client::send_request`].
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<(), RpcError> {
        self.send_request(method, params).await.map(|_| ())
    }

    /// Unary call: one request, one reply, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] for server errors, [`RpcError::Timeout`],
    /// [`RpcError::ConnectionClosed`], [`RpcError::InvalidResponse`], or
    /// [`RpcError::NotConnected`].
    pub async fn call(
        &self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.open(method, params, timeout, Waiter::Unary(tx)).await?;
        rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Unary call using the configured default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Client::call`].
    pub async fn call_default(&self, method: &str, params: impl Serialize) -> Result<Value, RpcError> {
        self.call(method, params, self.config.default_timeout).await
    }

    /// Unary call with the result deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::call`], plus [`RpcError::InvalidResponse`] when the
    /// result does not deserialize.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<T, RpcError> {
        let value = self.call_default(method, params).await?;
        serde_json::from_value(value).map_err(|_| RpcError::InvalidResponse)
    }

    /// Streaming call. `idle_timeout` bounds the silence before the first
    /// chunk and between any two chunks, not the stream's total duration.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NotConnected`] or [`RpcError::Encode`] up front;
    /// every later failure is reported by the returned stream.
    pub async fn call_stream(
        &self,
        method: &str,
        params: impl Serialize,
        idle_timeout: Duration,
    ) -> Result<CallStream, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.open(method, params, idle_timeout, Waiter::Stream(tx)).await?;
        Ok(CallStream::new(id, rx))
    }

    /// Streaming call using the configured default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Client::call_stream`].
    pub async fn call_stream_default(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<CallStream, RpcError> {
        self.call_stream(method, params, self.config.default_timeout).await
    }

    async fn open(
        &self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
        waiter: Waiter,
    ) -> Result<ExchangeId, RpcError> {
        let params = to_params(params)?;
        let (opened, id) = oneshot::channel();
        self.submit(Command::Open {
            method: method.to_owned(),
            params,
            timeout,
            waiter,
            opened,
        })
        .await?;
        id.await.map_err(|_| RpcError::ConnectionClosed)
    }

    async fn submit(&self, command: Command) -> Result<(), RpcError> {
        let tx = self.link.lock().await.clone().ok_or(RpcError::NotConnected)?;
        tx.send(command).map_err(|_| RpcError::NotConnected)
    }
}

fn to_params(params: impl Serialize) -> Result<Value, RpcError> {
    serde_json::to_value(params).map_err(|e| RpcError::Encode(e.to_string()))
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
