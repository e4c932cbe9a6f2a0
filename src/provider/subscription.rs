use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use alloy::{pubsub::Subscription, rpc::types::Header};
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tokio_stream::Stream;
use tokio_util::sync::ReusableBoxFuture;

use crate::provider::ProviderError;

/// New-heads subscription with a receive timeout.
///
/// Lagged notifications are skipped with a warning. A silent subscription produces
/// [`ProviderError::Timeout`] after `timeout` but stays usable.
#[derive(Debug)]
pub struct HeadSubscription {
    subscription: Subscription<Header>,
    timeout: Duration,
}

impl HeadSubscription {
    pub(crate) fn new(subscription: Subscription<Header>, timeout: Duration) -> Self {
        Self { subscription, timeout }
    }

    /// Receive the next header.
    ///
    /// # Errors
    ///
    /// * [`ProviderError::Timeout`] if no header arrives within the subscription timeout.
    /// * [`ProviderError::SubscriptionClosed`] once the server side of the subscription is gone.
    pub async fn recv(&mut self) -> Result<Header, ProviderError> {
        loop {
            match timeout(self.timeout, self.subscription.recv()).await {
                Ok(Ok(header)) => return Ok(header),
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped = skipped, "Subscription lagged");
                }
                Ok(Err(RecvError::Closed)) => {
                    error!("Subscription channel closed");
                    return Err(ProviderError::SubscriptionClosed);
                }
                Err(elapsed) => {
                    warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "Subscription timeout - no block received"
                    );
                    return Err(elapsed.into());
                }
            }
        }
    }

    /// Check if the subscription channel is empty (no pending messages)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscription.is_empty()
    }

    /// Convert the subscription into a stream.
    #[must_use]
    pub fn into_stream(self) -> HeadSubscriptionStream {
        HeadSubscriptionStream::from(self)
    }
}

type SubscriptionResult = (Result<Header, ProviderError>, HeadSubscription);

/// [`Stream`] over a [`HeadSubscription`].
///
/// Ends after yielding [`ProviderError::SubscriptionClosed`]; timeouts are yielded and the stream
/// keeps going.
pub struct HeadSubscriptionStream {
    inner: ReusableBoxFuture<'static, SubscriptionResult>,
    finished: bool,
}

impl std::fmt::Debug for HeadSubscriptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadSubscriptionStream").field("finished", &self.finished).finish()
    }
}

async fn make_future(mut rx: HeadSubscription) -> SubscriptionResult {
    let result = rx.recv().await;
    (result, rx)
}

impl HeadSubscriptionStream {
    /// Create a new `HeadSubscriptionStream`.
    #[must_use]
    pub fn new(rx: HeadSubscription) -> Self {
        Self { inner: ReusableBoxFuture::new(make_future(rx)), finished: false }
    }

    /// Returns true if the stream has reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for HeadSubscriptionStream {
    type Item = Result<Header, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let (result, rx) = ready!(self.inner.poll(cx));

        match result {
            Err(ProviderError::SubscriptionClosed) => {
                self.finished = true;
                Poll::Ready(Some(Err(ProviderError::SubscriptionClosed)))
            }
            other => {
                self.inner.set(make_future(rx));
                Poll::Ready(Some(other))
            }
        }
    }
}

impl From<HeadSubscription> for HeadSubscriptionStream {
    fn from(recv: HeadSubscription) -> Self {
        Self::new(recv)
    }
}
