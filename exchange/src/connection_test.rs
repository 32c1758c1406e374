use super::*;
use serde_json::json;
use std::io;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::task::{Context, Poll};
use tokio::io::ReadBuf;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::stream::StreamEvent;

/// Transport whose peer never speaks and whose every write fails.
struct BrokenWrites;

impl AsyncRead for BrokenWrites {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct Harness {
    commands: mpsc::UnboundedSender<Command>,
    closes: Arc<StdMutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

async fn spawn_broken() -> Harness {
    let socket = WebSocketStream::from_raw_socket(BrokenWrites, Role::Client, None).await;
    let (commands, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&closes);
    let on_close: CloseHandler = Arc::new(move |reason| sink.lock().expect("close log").push(reason));
    let task = tokio::spawn(run(socket, rx, Arc::new(IdSeed::default()), Some(on_close)));
    Harness {
        commands,
        closes,
        task,
    }
}

async fn finish(harness: Harness) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(2), harness.task)
        .await
        .expect("connection task ends")
        .expect("connection task did not panic");
    assert!(harness.commands.is_closed());
    harness.closes.lock().expect("close log").clone()
}

#[tokio::test]
async fn failed_write_settles_only_that_exchange_and_ends_connection() {
    let harness = spawn_broken().await;

    let (waiter, settled) = oneshot::channel();
    let (opened, id) = oneshot::channel();
    harness
        .commands
        .send(Command::Open {
            method: "getModelList".into(),
            params: json!({}),
            timeout: Duration::from_secs(5),
            waiter: Waiter::Unary(waiter),
            opened,
        })
        .expect("queued");

    assert_eq!(id.await.expect("id assigned"), 0);
    let outcome = settled.await.expect("settled");
    assert!(matches!(outcome, Err(RpcError::Connection(_))), "unexpected {outcome:?}");

    let closes = finish(harness).await;
    assert_eq!(closes.len(), 1);
    assert_ne!(closes[0], CLOSED_BY_SERVER);
}

#[tokio::test]
async fn failed_notify_write_reports_connection_error() {
    let harness = spawn_broken().await;

    let (sent, ack) = oneshot::channel();
    harness
        .commands
        .send(Command::Notify {
            method: "log".into(),
            params: json!({}),
            sent,
        })
        .expect("queued");

    let outcome = ack.await.expect("acknowledged");
    assert!(matches!(outcome, Err(RpcError::Connection(_))), "unexpected {outcome:?}");
    assert_eq!(finish(harness).await.len(), 1);
}

#[tokio::test]
async fn stream_failed_by_write_sees_connection_error_once() {
    let harness = spawn_broken().await;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (opened, id) = oneshot::channel();
    harness
        .commands
        .send(Command::Open {
            method: "chatCompletion".into(),
            params: json!({}),
            timeout: Duration::from_secs(5),
            waiter: Waiter::Stream(events_tx),
            opened,
        })
        .expect("queued");
    id.await.expect("id assigned");

    let closes = finish(harness).await;
    assert!(matches!(
        events.recv().await,
        Some(StreamEvent::Failed(RpcError::Connection(_)))
    ));
    // The entry was removed by the failed write, so close-all adds nothing.
    assert!(events.recv().await.is_none());
    assert_eq!(closes.len(), 1);
}
