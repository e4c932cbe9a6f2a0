//! Chain-head watchers.
//!
//! [`watch_block_number`] reports new block numbers, [`watch_blocks`] reports new blocks. Both pick
//! their mode once at creation: push mode consumes the provider's new-heads subscription, polling
//! mode asks the provider every `polling_interval`. Either way the same de-duplication applies, so
//! callers observe the same sequence.
//!
//! Watchers run on a spawned tokio task and must be started from inside a runtime. They stop when
//! their [`WatchHandle`](crate::WatchHandle) is stopped or dropped.

use std::{fmt, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{error::WatchError, provider::ChainProvider};

pub mod block_number;
pub mod blocks;
mod ring_buffer;

pub use block_number::{BlockNumberWatchOptions, watch_block_number};
pub use blocks::{BlockWatchOptions, watch_blocks};

/// Default interval between two polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(4);

/// Callback receiving errors a watcher ran into. The watcher keeps running.
pub type OnError = Box<dyn FnMut(WatchError) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchMode {
    Polling,
    Subscription,
}

impl WatchMode {
    pub(crate) fn select<P: ChainProvider>(provider: &P, poll: Option<bool>) -> Self {
        match poll {
            Some(true) => WatchMode::Polling,
            _ if provider.supports_subscriptions() => WatchMode::Subscription,
            Some(false) => {
                warn!("Provider does not support subscriptions, falling back to polling");
                WatchMode::Polling
            }
            None => WatchMode::Polling,
        }
    }
}

/// Routes watcher errors to the caller's `on_error`, or to the log when there is none.
pub(crate) struct ErrorSink {
    on_error: Option<OnError>,
    token: CancellationToken,
}

impl ErrorSink {
    pub(crate) fn new(on_error: Option<OnError>, token: CancellationToken) -> Self {
        Self { on_error, token }
    }

    pub(crate) fn report(&mut self, err: impl Into<WatchError>) {
        if self.token.is_cancelled() {
            return;
        }
        let err = err.into();
        match &mut self.on_error {
            Some(on_error) => on_error(err),
            None => warn!(error = %err, "Watcher error"),
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").field("on_error", &self.on_error.is_some()).finish()
    }
}
