use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::DispatchError;

pub(crate) type CompletionSender<T> = oneshot::Sender<Result<T, DispatchError>>;

/// Resolves once work scheduled on the main thread has finished.
///
/// Panics inside the work surface here as [`DispatchError::WorkPanicked`]; a
/// dispatcher that shuts down before running the work yields
/// [`DispatchError::Cancelled`].
#[must_use = "a completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T, DispatchError>>,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (CompletionSender<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    pub(crate) fn ready(result: Result<T, DispatchError>) -> Self {
        let (sender, completion) = Self::channel();
        let _ = sender.send(result);
        completion
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::Completion;
    use crate::error::DispatchError;

    #[tokio::test]
    async fn unit_ready_completion_resolves_immediately() {
        let value = Completion::ready(Ok(7_u32)).await.expect("ready value");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn regression_dropped_sender_resolves_as_cancelled() {
        let (sender, completion) = Completion::<u32>::channel();
        drop(sender);
        assert_eq!(completion.await, Err(DispatchError::Cancelled));
    }
}
