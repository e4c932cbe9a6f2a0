//! Block watcher.

use std::{fmt, ops::RangeInclusive, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{BlockHash, BlockNumber},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::WatchError,
    handle::WatchHandle,
    poller::{PollStep, Poller},
    provider::ChainProvider,
    types::Block,
    watch::{
        BlockNumberWatchOptions, ErrorSink, WatchMode,
        ring_buffer::{RECENT_BLOCKS_CAPACITY, RingBuffer},
    },
};

/// Configuration for [`watch_blocks`].
#[derive(Default)]
pub struct BlockWatchOptions {
    pub(crate) base: BlockNumberWatchOptions,
    pub(crate) block_tag: BlockNumberOrTag,
    pub(crate) include_transactions: bool,
}

impl fmt::Debug for BlockWatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockWatchOptions")
            .field("base", &self.base)
            .field("block_tag", &self.block_tag)
            .field("include_transactions", &self.include_transactions)
            .finish()
    }
}

impl BlockWatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force polling (`true`) or ask for push subscriptions (`false`).
    ///
    /// Unset, the watcher subscribes whenever the provider supports it and the tag is `latest`.
    #[must_use]
    pub fn poll(mut self, poll: bool) -> Self {
        self.base = self.base.poll(poll);
        self
    }

    /// Interval between two polls. Ignored in subscription mode.
    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.base = self.base.polling_interval(interval);
        self
    }

    /// Report the current block immediately.
    #[must_use]
    pub fn emit_on_begin(mut self, emit_on_begin: bool) -> Self {
        self.base = self.base.emit_on_begin(emit_on_begin);
        self
    }

    /// Fetch and report every block skipped between two observations.
    #[must_use]
    pub fn emit_missed(mut self, emit_missed: bool) -> Self {
        self.base = self.base.emit_missed(emit_missed);
        self
    }

    /// Receive errors instead of having them logged.
    #[must_use]
    pub fn on_error(mut self, on_error: impl FnMut(WatchError) + Send + 'static) -> Self {
        self.base = self.base.on_error(on_error);
        self
    }

    /// Block to follow. Anything but `latest` is always polled.
    #[must_use]
    pub fn block_tag(mut self, block_tag: BlockNumberOrTag) -> Self {
        self.block_tag = block_tag;
        self
    }

    /// Deliver blocks with full transaction bodies.
    #[must_use]
    pub fn include_transactions(mut self, include_transactions: bool) -> Self {
        self.include_transactions = include_transactions;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Observation {
    /// Already emitted.
    Seen,
    /// Below the last emitted block.
    Stale,
    /// Emit after fetching the (possibly empty) range of skipped heights.
    New { missed: RangeInclusive<BlockNumber> },
}

/// De-duplicates blocks on `(number, hash)`.
///
/// A block at the height of the last emitted one but with another hash replaced it on chain and
/// is emitted.
#[derive(Debug, Clone)]
pub(crate) struct BlockTracker {
    last: Option<Block>,
    seen: RingBuffer<(BlockNumber, BlockHash)>,
    emit_missed: bool,
}

impl BlockTracker {
    pub(crate) fn new(emit_missed: bool) -> Self {
        Self { last: None, seen: RingBuffer::new(RECENT_BLOCKS_CAPACITY), emit_missed }
    }

    pub(crate) fn classify(&self, block: &Block) -> Observation {
        if self.seen.contains(&block.identity()) {
            return Observation::Seen;
        }
        let Some(last) = &self.last else {
            return Observation::New { missed: empty_range() };
        };
        if block.number < last.number {
            return Observation::Stale;
        }
        if self.emit_missed && block.number > last.number + 1 {
            Observation::New { missed: last.number + 1..=block.number - 1 }
        } else {
            Observation::New { missed: empty_range() }
        }
    }

    /// Marks `block` as emitted and returns the block emitted before it.
    pub(crate) fn record(&mut self, block: &Block) -> Option<Block> {
        self.seen.push(block.identity());
        self.last.replace(block.clone())
    }

    pub(crate) fn last_number(&self) -> Option<BlockNumber> {
        self.last.as_ref().map(|block| block.number)
    }
}

#[allow(clippy::reversed_empty_ranges)]
fn empty_range() -> RangeInclusive<BlockNumber> {
    1..=0
}

struct BlockWatcher<P, F> {
    provider: P,
    tracker: BlockTracker,
    block_tag: BlockNumberOrTag,
    include_transactions: bool,
    on_block: F,
    errors: ErrorSink,
    token: CancellationToken,
}

impl<P, F> BlockWatcher<P, F>
where
    P: ChainProvider + 'static,
    F: FnMut(Block, Option<Block>) + Send + 'static,
{
    fn emit(&mut self, block: Block) {
        if self.token.is_cancelled() {
            return;
        }
        let previous = self.tracker.record(&block);
        trace!(number = block.number, hash = %block.hash, "Emitting block");
        (self.on_block)(block, previous);
    }

    async fn observe(&mut self, block: Block) {
        let missed = match self.tracker.classify(&block) {
            Observation::Seen => return,
            Observation::Stale => {
                trace!(
                    number = block.number,
                    last = ?self.tracker.last_number(),
                    "Discarding block below the last emitted one"
                );
                return;
            }
            Observation::New { missed } => missed,
        };

        for number in missed {
            if self.token.is_cancelled() {
                return;
            }
            match self.provider.get_block(BlockId::number(number), self.include_transactions).await
            {
                Ok(missed_block) => self.emit(missed_block),
                Err(e) => debug!(number = number, error = %e, "Skipping unavailable missed block"),
            }
        }

        self.emit(block);
    }

    async fn fetch_and_observe(&mut self) {
        match self.provider.get_block(BlockId::Number(self.block_tag), self.include_transactions).await
        {
            Ok(block) => self.observe(block).await,
            Err(e) => self.errors.report(e),
        }
    }

    /// Pushed heads carry no transaction list, so the block is fetched by hash in the shape a poll
    /// would return it.
    async fn complete_head(&mut self, head: Block) -> Option<Block> {
        if head.transactions.is_full() {
            if self.include_transactions {
                return Some(head);
            }
            return Some(Block { transactions: head.transactions.into_hashes(), ..head });
        }
        if self.tracker.classify(&head) == Observation::Seen {
            return None;
        }
        match self.provider.get_block(BlockId::hash(head.hash), self.include_transactions).await {
            Ok(block) => Some(block),
            Err(e) => {
                self.errors.report(e);
                None
            }
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
            let head = tokio::select! {
                biased;

                () = token.cancelled() => break,
                head = heads.next() => head,
            };
            match head {
                Some(Ok(head)) => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = async {
                            if let Some(block) = self.complete_head(head).await {
                                self.observe(block).await;
                            }
                        } => {}
                    }
                }
                Some(Err(e)) => self.errors.report(e),
                None => {
                    debug!("Head subscription ended");
                    break;
                }
            }
        }
    }
}

impl<P, F> PollStep for BlockWatcher<P, F>
where
    P: ChainProvider + 'static,
    F: FnMut(Block, Option<Block>) + Send + 'static,
{
    async fn step(&mut self) {
        self.fetch_and_observe().await;
    }
}

/// Watches the chain and calls `on_block(block, previous)` for every new block.
///
/// A block is reported once per `(number, hash)`. Blocks below the last reported height are
/// dropped, while a different block at the same height (a replaced head) is reported. With
/// [`BlockWatchOptions::emit_missed`] skipped heights are fetched and reported in order; heights
/// the provider cannot serve are skipped.
///
/// Must be called from within a tokio runtime.
pub fn watch_blocks<P, F>(provider: P, options: BlockWatchOptions, on_block: F) -> WatchHandle
where
    P: ChainProvider + 'static,
    F: FnMut(Block, Option<Block>) + Send + 'static,
{
    let BlockWatchOptions { base, block_tag, include_transactions } = options;

    let poll = if block_tag == BlockNumberOrTag::Latest { base.poll } else { Some(true) };
    let mode = WatchMode::select(&provider, poll);
    let token = CancellationToken::new();
    let poller = Poller::new(base.polling_interval).emit_on_begin(base.emit_on_begin);

    debug!(
        mode = ?mode,
        block_tag = %block_tag,
        include_transactions = include_transactions,
        polling_interval_ms = base.polling_interval.as_millis(),
        emit_missed = base.emit_missed,
        "Starting block watcher"
    );

    let watcher = BlockWatcher {
        provider,
        tracker: BlockTracker::new(base.emit_missed),
        block_tag,
        include_transactions,
        on_block,
        errors: ErrorSink::new(base.on_error, token.clone()),
        token: token.clone(),
    };

    let task = match mode {
        WatchMode::Polling => tokio::spawn(poller.run(watcher, token.clone())),
        WatchMode::Subscription => tokio::spawn(watcher.subscribe(poller)),
    };

    WatchHandle::new(token, task)
}
