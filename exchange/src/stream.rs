//! Consumer side of a streaming exchange.
//!
//! The connection task pushes [`StreamEvent`]s into an unbounded queue as
//! chunks arrive; [`CallStream`] pulls them in arrival order. Chunks that
//! arrive before the consumer asks are buffered, and a terminal event is only
//! observed after every chunk queued ahead of it.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use envelope::ExchangeId;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::RpcError;

/// What the connection task queues for a stream consumer.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Chunk(Value),
    End(Value),
    Failed(RpcError),
}

/// One pulled element of a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
    /// An intermediate result.
    Chunk(Value),
    /// The terminal result. No further items follow.
    End(Value),
}

/// Pull-based, single-pass view of a streaming exchange.
///
/// Once it has yielded [`StreamItem::End`] or an error, every later pull
/// fails: with the same error, or with [`RpcError::StreamFinished`] after a
/// normal end.
#[derive(Debug)]
pub struct CallStream {
    id: ExchangeId,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    terminal: Option<RpcError>,
}

impl CallStream {
    pub(crate) fn new(id: ExchangeId, events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self {
            id,
            events,
            terminal: None,
        }
    }

    /// Correlation id of the underlying exchange.
    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Whether the stream has ended, normally or by error.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    /// Wait for the next chunk or the end value.
    ///
    /// # Errors
    ///
    /// Returns the exchange's terminal error: [`RpcError::Remote`],
    /// [`RpcError::Timeout`], [`RpcError::ConnectionClosed`],
    /// [`RpcError::InvalidResponse`], or [`RpcError::StreamFinished`] when
    /// pulled again after the end value.
    pub async fn next_item(&mut self) -> Result<StreamItem, RpcError> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Drain the stream, returning every chunk and the end value.
    ///
    /// # Errors
    ///
    /// Returns the first terminal error; chunks received before it are discarded.
    pub async fn collect_all(mut self) -> Result<(Vec<Value>, Value), RpcError> {
        let mut chunks = Vec::new();
        loop {
            match self.next_item().await? {
                StreamItem::Chunk(value) => chunks.push(value),
                StreamItem::End(value) => return Ok((chunks, value)),
            }
        }
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Result<StreamItem, RpcError>> {
        if let Some(err) = &self.terminal {
            return Poll::Ready(Err(err.clone()));
        }

        let item = match ready!(self.events.poll_recv(cx)) {
            Some(StreamEvent::Chunk(value)) => Ok(StreamItem::Chunk(value)),
            Some(StreamEvent::End(value)) => {
                self.terminal = Some(RpcError::StreamFinished);
                Ok(StreamItem::End(value))
            }
            Some(StreamEvent::Failed(err)) => {
                self.terminal = Some(err.clone());
                Err(err)
            }
            // The connection task dropped the sender without a terminal event.
            None => {
                self.terminal = Some(RpcError::ConnectionClosed);
                Err(RpcError::ConnectionClosed)
            }
        };
        Poll::Ready(item)
    }
}

/// Yields chunks, the end value, or the first error, then `None`.
impl Stream for CallStream {
    type Item = Result<StreamItem, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminal.is_some() {
            return Poll::Ready(None);
        }
        this.poll_item(cx).map(Some)
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
