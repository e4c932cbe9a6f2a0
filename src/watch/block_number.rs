//! Block number watcher.

use std::{fmt, time::Duration};

use alloy::primitives::BlockNumber;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::WatchError,
    handle::WatchHandle,
    poller::{PollStep, Poller},
    provider::ChainProvider,
    watch::{DEFAULT_POLLING_INTERVAL, ErrorSink, OnError, WatchMode},
};

/// Configuration for [`watch_block_number`].
pub struct BlockNumberWatchOptions {
    pub(crate) poll: Option<bool>,
    pub(crate) polling_interval: Duration,
    pub(crate) emit_on_begin: bool,
    pub(crate) emit_missed: bool,
    pub(crate) on_error: Option<OnError>,
}

impl Default for BlockNumberWatchOptions {
    fn default() -> Self {
        Self {
            poll: None,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            emit_on_begin: false,
            emit_missed: false,
            on_error: None,
        }
    }
}

impl fmt::Debug for BlockNumberWatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockNumberWatchOptions")
            .field("poll", &self.poll)
            .field("polling_interval", &self.polling_interval)
            .field("emit_on_begin", &self.emit_on_begin)
            .field("emit_missed", &self.emit_missed)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl BlockNumberWatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force polling (`true`) or ask for push subscriptions (`false`).
    ///
    /// Unset, the watcher subscribes whenever the provider supports it.
    #[must_use]
    pub fn poll(mut self, poll: bool) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Interval between two polls. Ignored in subscription mode.
    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Report the current block number immediately instead of waiting for the next change.
    #[must_use]
    pub fn emit_on_begin(mut self, emit_on_begin: bool) -> Self {
        self.emit_on_begin = emit_on_begin;
        self
    }

    /// Report every skipped number when the chain advanced by more than one between two
    /// observations.
    #[must_use]
    pub fn emit_missed(mut self, emit_missed: bool) -> Self {
        self.emit_missed = emit_missed;
        self
    }

    /// Receive errors instead of having them logged.
    #[must_use]
    pub fn on_error(mut self, on_error: impl FnMut(WatchError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

/// Turns raw observations into the emitted `(number, previous)` sequence.
///
/// Numbers at or below the last emitted one are discarded. Emitted numbers are strictly
/// increasing.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockNumberTracker {
    last: Option<BlockNumber>,
    emit_missed: bool,
}

impl BlockNumberTracker {
    pub(crate) fn new(emit_missed: bool) -> Self {
        Self { last: None, emit_missed }
    }

    pub(crate) fn observe(&mut self, number: BlockNumber) -> Vec<(BlockNumber, Option<BlockNumber>)> {
        let emissions = match self.last {
            None => vec![(number, None)],
            Some(last) if number <= last => return Vec::new(),
            Some(last) if self.emit_missed && number - last > 1 => {
                (last + 1..=number).map(|n| (n, Some(n - 1))).collect()
            }
            Some(last) => vec![(number, Some(last))],
        };
        self.last = Some(number);
        emissions
    }
}

struct BlockNumberWatcher<P, F> {
    provider: P,
    tracker: BlockNumberTracker,
    on_block_number: F,
    errors: ErrorSink,
    token: CancellationToken,
}

impl<P, F> BlockNumberWatcher<P, F>
where
    P: ChainProvider + 'static,
    F: FnMut(BlockNumber, Option<BlockNumber>) + Send + 'static,
{
    fn observe(&mut self, number: BlockNumber) {
        for (number, previous) in self.tracker.observe(number) {
            if self.token.is_cancelled() {
                return;
            }
            trace!(number = number, "Emitting block number");
            (self.on_block_number)(number, previous);
        }
    }

    async fn fetch_and_observe(&mut self) {
        match self.provider.get_block_number().await {
            Ok(number) => self.observe(number),
            Err(e) => self.errors.report(e),
        }
    }

    async fn subscribe(mut self, poller: Poller) {
        let token = self.token.clone();

        let subscription = tokio::select! {
            () = token.cancelled() => return,
            result = self.provider.subscribe_new_heads() => result,
        };
        let mut heads = match subscription {
            Ok(heads) => heads,
            Err(e) => {
                warn!(error = %e, "Could not subscribe to new heads, falling back to polling");
                self.errors.report(e);
                poller.emit_on_begin(true).run(self, token).await;
                return;
            }
        };

        if poller.emits_on_begin() {
            tokio::select! {
                () = token.cancelled() => return,
                () = self.fetch_and_observe() => {}
            }
        }

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => break,
                head = heads.next() => match head {
                    Some(Ok(block)) => self.observe(block.number),
                    Some(Err(e)) => self.errors.report(e),
                    None => {
                        debug!("Head subscription ended");
                        break;
                    }
                },
            }
        }
    }
}

impl<P, F> PollStep for BlockNumberWatcher<P, F>
where
    P: ChainProvider + 'static,
    F: FnMut(BlockNumber, Option<BlockNumber>) + Send + 'static,
{
    async fn step(&mut self) {
        self.fetch_and_observe().await;
    }
}

/// Watches the chain head and calls `on_block_number(number, previous)` for every new block
/// number.
///
/// Reported numbers are strictly increasing: repeated or lower observations are dropped. With
/// [`BlockNumberWatchOptions::emit_missed`] every number in a gap is reported in order.
///
/// Must be called from within a tokio runtime.
pub fn watch_block_number<P, F>(
    provider: P,
    options: BlockNumberWatchOptions,
    on_block_number: F,
) -> WatchHandle
where
    P: ChainProvider + 'static,
    F: FnMut(BlockNumber, Option<BlockNumber>) + Send + 'static,
{
    let mode = WatchMode::select(&provider, options.poll);
    let token = CancellationToken::new();
    let poller = Poller::new(options.polling_interval).emit_on_begin(options.emit_on_begin);

    debug!(
        mode = ?mode,
        polling_interval_ms = options.polling_interval.as_millis(),
        emit_missed = options.emit_missed,
        "Starting block number watcher"
    );

    let watcher = BlockNumberWatcher {
        provider,
        tracker: BlockNumberTracker::new(options.emit_missed),
        on_block_number,
        errors: ErrorSink::new(options.on_error, token.clone()),
        token: token.clone(),
    };

    let task = match mode {
        WatchMode::Polling => tokio::spawn(poller.run(watcher, token.clone())),
        WatchMode::Subscription => tokio::spawn(watcher.subscribe(poller)),
    };

    WatchHandle::new(token, task)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        assert_closed, assert_empty, assert_next,
        provider::ProviderError,
        test_utils::{MockProvider, recorder},
        types::Block,
    };
    use tokio::time::sleep;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn tracker_discards_stale_numbers() {
        let mut tracker = BlockNumberTracker::new(false);

        assert_eq!(tracker.observe(420), vec![(420, None)]);
        assert_eq!(tracker.observe(421), vec![(421, Some(420))]);
        assert!(tracker.observe(421).is_empty());
        assert!(tracker.observe(419).is_empty());
        assert_eq!(tracker.observe(424), vec![(424, Some(421))]);
    }

    #[test]
    fn tracker_backfills_gaps_when_emitting_missed() {
        let mut tracker = BlockNumberTracker::new(true);

        assert_eq!(tracker.observe(420), vec![(420, None)]);
        assert_eq!(tracker.observe(421), vec![(421, Some(420))]);
        assert!(tracker.observe(419).is_empty());
        assert_eq!(tracker.observe(424), vec![(422, Some(421)), (423, Some(422)), (424, Some(423))]);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_reports_increasing_numbers() {
        let provider = MockProvider::new();
        provider.push_block_numbers([420, 421, 419, 424]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().poll(true).polling_interval(INTERVAL).emit_on_begin(true),
            move |number, previous| recorder.record((number, previous)),
        );

        assert_next!(stream, (420, None));
        assert_next!(stream, (421, Some(420)));
        assert_next!(stream, (424, Some(421)));

        sleep(INTERVAL * 5).await;
        let _stream = assert_empty!(stream);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polling_emits_missed_numbers_in_order() {
        let provider = MockProvider::new();
        provider.push_block_numbers([420, 421, 419, 424]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider,
            BlockNumberWatchOptions::new()
                .poll(true)
                .polling_interval(INTERVAL)
                .emit_on_begin(true)
                .emit_missed(true),
            move |number, previous| recorder.record((number, previous)),
        );

        assert_next!(stream, (420, None));
        assert_next!(stream, (421, Some(420)));
        assert_next!(stream, (422, Some(421)));
        assert_next!(stream, (423, Some(422)));
        assert_next!(stream, (424, Some(423)));

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn without_emit_on_begin_first_poll_waits_an_interval() {
        let provider = MockProvider::new();
        provider.push_block_numbers([7]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().poll(true).polling_interval(INTERVAL),
            move |number, previous| recorder.record((number, previous)),
        );

        sleep(INTERVAL / 2).await;
        assert_eq!(provider.calls("get_block_number"), 0);

        assert_next!(stream, (7, None));
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_callbacks() {
        let provider = MockProvider::new();
        provider.push_block_numbers([1, 2, 3, 4, 5]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().poll(true).polling_interval(INTERVAL).emit_on_begin(true),
            move |number, previous| recorder.record((number, previous)),
        );

        assert_next!(stream, (1, None));
        handle.stop();
        handle.stop();
        let calls = provider.calls("get_block_number");

        sleep(INTERVAL * 10).await;
        assert_eq!(provider.calls("get_block_number"), calls);
        handle.join().await;
        assert_closed!(stream);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_before_the_first_poll_reports_nothing() {
        let provider = MockProvider::new();
        provider.push_block_numbers([1, 2, 3]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().poll(true).polling_interval(INTERVAL),
            move |number, previous| recorder.record((number, previous)),
        );

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        sleep(INTERVAL * 5).await;

        assert_eq!(provider.calls("get_block_number"), 0);
        handle.join().await;
        assert_closed!(stream);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_reported_and_polling_continues() {
        let provider = MockProvider::new();
        provider.push_block_numbers([10]);
        provider.push_block_number_error(ProviderError::Timeout);
        provider.push_block_numbers([11]);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider,
            BlockNumberWatchOptions::new()
                .poll(true)
                .polling_interval(INTERVAL)
                .emit_on_begin(true)
                .on_error({
                    let errors = errors.clone();
                    move |e| errors.lock().unwrap().push(e)
                }),
            move |number, previous| recorder.record((number, previous)),
        );

        assert_next!(stream, (10, None));
        assert_next!(stream, (11, Some(10)));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], WatchError::Provider(ProviderError::Timeout)));
        drop(errors);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn independent_watchers_do_not_share_state() {
        let provider = MockProvider::new();
        provider.push_block_numbers([5]);
        let (first, mut first_stream) = recorder();
        let (second, mut second_stream) = recorder();
        let options =
            || BlockNumberWatchOptions::new().poll(true).polling_interval(INTERVAL).emit_on_begin(true);

        let a = watch_block_number(provider.clone(), options(), move |n, p| first.record((n, p)));
        assert_next!(first_stream, (5, None));
        let b = watch_block_number(provider.clone(), options(), move |n, p| second.record((n, p)));
        assert_next!(second_stream, (5, None));

        a.join().await;
        b.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_mode_uses_pushed_heads() {
        let provider = MockProvider::new().with_subscriptions();
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().emit_missed(true),
            move |number, previous| recorder.record((number, previous)),
        );

        sleep(Duration::from_millis(1)).await;
        assert_eq!(provider.subscriber_count(), 1);

        provider.mine_empty();
        assert_next!(stream, (1, None));

        provider.push_head(&Block::default());
        provider.push_head(&Block { number: 4, ..Block::default() });
        assert_next!(stream, (2, Some(1)));
        assert_next!(stream, (3, Some(2)));
        assert_next!(stream, (4, Some(3)));

        assert_eq!(provider.calls("get_block_number"), 0);
        handle.join().await;
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_mode_emits_current_number_on_begin() {
        let provider = MockProvider::new().with_subscriptions();
        provider.push_block_numbers([100]);
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new().emit_on_begin(true),
            move |number, previous| recorder.record((number, previous)),
        );

        assert_next!(stream, (100, None));
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_errors_are_reported_until_the_stream_closes() {
        let provider = MockProvider::new().with_subscriptions();
        let (recorder, mut stream) = recorder();

        let handle = watch_block_number(
            provider.clone(),
            BlockNumberWatchOptions::new()
                .on_error(move |e| recorder.record(e.to_string())),
            |_, _| {},
        );

        sleep(Duration::from_millis(1)).await;
        provider.push_head_error(ProviderError::SubscriptionClosed);
        assert_next!(stream, ProviderError::SubscriptionClosed.to_string());

        provider.close_subscriptions();
        handle.join().await;
        assert_closed!(stream);
    }
}
