//! Client-side exchange multiplexer over a single WebSocket connection.
//!
//! One ordered, message-oriented duplex transport carries many concurrent
//! logical exchanges: unary calls and server-streamed calls, each with its own
//! deadline, all sharing one connection and one correlation-id space.
//!
//! ```ignore
//! let client = Client::new(ClientConfig::from_env()?)
//!     .on_close(|reason| tracing::warn!(%reason, "server went away"));
//! client.connect().await?;
//!
//! let models = client.call_default("getModelList", json!({})).await?;
//!
//! let mut stream = client.call_stream_default("chatCompletion", params).await?;
//! while let StreamItem::Chunk(text) = stream.next_item().await? {
//!     print!("{text}");
//! }
//! client.close().await;
//! ```

mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod stream;

#[cfg(test)]
mod test_helpers;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, DEFAULT_ADDRESS, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
pub use connection::CloseHandler;
pub use envelope::{ExchangeId, codes};
pub use error::RpcError;
pub use stream::{CallStream, StreamItem};
