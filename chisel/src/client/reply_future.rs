//! Caller-side handle of one enqueued call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::types::CallId;

/// Outcome delivered through a reply channel.
pub(crate) type CallOutcome = Result<Value, CallError>;

/// Future that resolves when the response for one call arrives.
///
/// Resolves exactly once: with the response data, with the server's error,
/// with [`CallError::Timeout`] when a deadline is configured, or with
/// [`CallError::ConnectionClosed`] if the batcher goes away first.
#[derive(Debug)]
pub struct ReplyFuture {
    id: CallId,
    receiver: oneshot::Receiver<CallOutcome>,
}

impl ReplyFuture {
    pub(crate) fn new(id: CallId, receiver: oneshot::Receiver<CallOutcome>) -> Self {
        Self { id, receiver }
    }

    /// A future that is already settled with `error`.
    ///
    /// Used for calls rejected before they could be enqueued. Its id is 0,
    /// which no batcher ever assigns.
    pub(crate) fn failed(error: CallError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        Self { id: 0, receiver }
    }

    /// Correlation id of the call.
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for ReplyFuture {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_resolves_with_sent_value() {
        let (sender, receiver) = oneshot::channel();
        let reply = ReplyFuture::new(4, receiver);
        assert_eq!(reply.id(), 4);

        sender.send(Ok(json!("pong"))).expect("receiver alive");
        assert_eq!(reply.await, Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_connection_closed() {
        let (sender, receiver) = oneshot::channel::<CallOutcome>();
        let reply = ReplyFuture::new(1, receiver);
        drop(sender);
        assert_eq!(reply.await, Err(CallError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_failed_is_settled() {
        let reply = ReplyFuture::failed(CallError::ConnectionClosed);
        assert_eq!(reply.id(), 0);
        assert_eq!(reply.await, Err(CallError::ConnectionClosed));
    }
}
