//! Waiting for a transaction to be mined and confirmed.
//!
//! [`wait_for_transaction_receipt`] follows the chain block by block until the receipt of the
//! awaited transaction is buried under the requested number of confirmations. While the receipt
//! is missing, every new block is searched for a transaction that took the awaited transaction's
//! nonce; if one is found, the wait continues with the replacement's receipt instead.

use std::{fmt, future::pending, time::Duration};

use alloy::{
    eips::BlockId,
    primitives::{BlockNumber, TxHash},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    error::WatchError,
    provider::{ChainProvider, ProviderError},
    replacement::detect_replacement,
    types::{Block, ReplacementInfo, Transaction, TransactionReceipt, TransactionSelector},
    watch::{BlockWatchOptions, DEFAULT_POLLING_INTERVAL, watch_blocks},
};

/// Default upper bound of a whole wait.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);
/// Default number of retries for lookups nodes are known to serve late.
pub const DEFAULT_RETRY_COUNT: usize = 6;
/// Default delay before the first of those retries. It doubles on every attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

type OnReplaced = Box<dyn FnOnce(ReplacementInfo) + Send>;

/// Configuration for [`wait_for_transaction_receipt`].
pub struct WaitForReceiptOptions {
    hash: TxHash,
    confirmations: u64,
    timeout: Option<Duration>,
    polling_interval: Duration,
    check_replacement: bool,
    on_replaced: Option<OnReplaced>,
    signal: Option<CancellationToken>,
    retry_count: usize,
    retry_delay: Duration,
}

impl fmt::Debug for WaitForReceiptOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForReceiptOptions")
            .field("hash", &self.hash)
            .field("confirmations", &self.confirmations)
            .field("timeout", &self.timeout)
            .field("polling_interval", &self.polling_interval)
            .field("check_replacement", &self.check_replacement)
            .field("on_replaced", &self.on_replaced.is_some())
            .field("signal", &self.signal)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl WaitForReceiptOptions {
    /// Wait for the transaction with `hash`, with default settings.
    #[must_use]
    pub fn new(hash: TxHash) -> Self {
        Self {
            hash,
            confirmations: 1,
            timeout: Some(DEFAULT_RECEIPT_TIMEOUT),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            check_replacement: true,
            on_replaced: None,
            signal: None,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Number of blocks, counting the mining block, the receipt must be buried under. `0` is
    /// treated as `1`.
    #[must_use]
    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    /// Upper bound of the whole wait. `None` waits forever.
    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Look for transactions replacing the awaited one. Enabled by default.
    #[must_use]
    pub fn check_replacement(mut self, check_replacement: bool) -> Self {
        self.check_replacement = check_replacement;
        self
    }

    /// Called once, before the wait resolves, if the transaction got replaced.
    #[must_use]
    pub fn on_replaced(mut self, on_replaced: impl FnOnce(ReplacementInfo) + Send + 'static) -> Self {
        self.on_replaced = Some(Box::new(on_replaced));
        self
    }

    /// Abort the wait with [`WatchError::Aborted`] once `signal` is cancelled.
    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Progress of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WaitState {
    /// No receipt yet. Holds the awaited transaction once it was looked up.
    Pending { transaction: Option<Transaction> },
    /// A receipt (of the awaited transaction or its replacement) waits for confirmations.
    Confirming { receipt: TransactionReceipt },
}

fn is_confirmed(tick: BlockNumber, receipt: &TransactionReceipt, confirmations: u64) -> bool {
    tick.saturating_sub(receipt.block_number) + 1 >= confirmations
}

struct ReceiptWaiter<'a, P> {
    provider: &'a P,
    hash: TxHash,
    confirmations: u64,
    check_replacement: bool,
    on_replaced: Option<OnReplaced>,
    retry_count: usize,
    retry_delay: Duration,
    transaction_looked_up: bool,
    state: WaitState,
}

impl<P: ChainProvider> ReceiptWaiter<'_, P> {
    /// Consumes ticks until the receipt is confirmed or the replacement path fails.
    async fn run(
        &mut self,
        ticks: &mut mpsc::UnboundedReceiver<Block>,
    ) -> Result<TransactionReceipt, WatchError> {
        while let Some(block) = ticks.recv().await {
            if let Some(receipt) = self.on_tick(&block).await? {
                return Ok(receipt);
            }
        }
        // the tick source only ends once stopped; leave it to the deadline or the signal
        pending().await
    }

    fn backoff(&self) -> ExponentialBuilder {
        backoff(self.retry_delay, self.retry_count)
    }

    /// Processes one block and returns the receipt once it is confirmed.
    async fn on_tick(&mut self, block: &Block) -> Result<Option<TransactionReceipt>, WatchError> {
        if matches!(self.state, WaitState::Pending { .. }) {
            self.check_pending(block).await?;
        }

        match &self.state {
            WaitState::Confirming { receipt }
                if is_confirmed(block.number, receipt, self.confirmations) =>
            {
                Ok(Some(receipt.clone()))
            }
            WaitState::Confirming { receipt } => {
                trace!(
                    block_number = block.number,
                    receipt_block = receipt.block_number,
                    confirmations = self.confirmations,
                    "Waiting for confirmations"
                );
                Ok(None)
            }
            WaitState::Pending { .. } => Ok(None),
        }
    }

    async fn check_pending(&mut self, block: &Block) -> Result<(), WatchError> {
        match self.provider.get_transaction_receipt(self.hash).await {
            Ok(receipt) => {
                debug!(
                    hash = %self.hash,
                    block_number = receipt.block_number,
                    "Transaction mined"
                );
                self.state = WaitState::Confirming { receipt };
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(hash = %self.hash, error = %e, "Receipt lookup failed, skipping block");
                return Ok(());
            }
        }

        if !self.check_replacement {
            return Ok(());
        }

        let Some(original) = self.original_transaction().await else {
            return Ok(());
        };

        let hash = self.hash;
        let backoff = self.backoff();
        let block = full_block(self.provider, block, backoff).await.inspect_err(|e| {
            error!(hash = %hash, error = %e, "Block lookup failed while checking for replacement");
        })?;

        let Some(info) = detect_replacement(self.provider, &original, &block)
            .await
            .inspect_err(|e| error!(hash = %hash, error = %e, "Replacement receipt lookup failed"))?
        else {
            return Ok(());
        };

        info!(
            hash = %self.hash,
            replacement = %info.transaction.hash,
            reason = %info.reason,
            "Transaction replaced"
        );
        let receipt = info.transaction_receipt.clone();
        if let Some(on_replaced) = self.on_replaced.take() {
            on_replaced(info);
        }
        self.state = WaitState::Confirming { receipt };
        Ok(())
    }

    /// The awaited transaction, if the provider knows it.
    ///
    /// The first lookup is retried while the transaction is not found, later ones are not.
    async fn original_transaction(&mut self) -> Option<Transaction> {
        if let WaitState::Pending { transaction: Some(transaction) } = &self.state {
            return Some(transaction.clone());
        }

        let provider = self.provider;
        let selector = TransactionSelector::Hash(self.hash);
        let lookup = || provider.get_transaction(selector);

        let backoff = self.backoff();
        let result = if self.transaction_looked_up {
            lookup().await
        } else {
            self.transaction_looked_up = true;
            lookup
                .retry(backoff)
                .sleep(sleep)
                .when(ProviderError::is_not_found)
                .notify(|err: &ProviderError, dur: Duration| {
                    trace!(error = %err, "Transaction not found, retrying after {:?}", dur);
                })
                .await
        };

        match result {
            Ok(transaction) => {
                self.state = WaitState::Pending { transaction: Some(transaction.clone()) };
                Some(transaction)
            }
            Err(e) if e.is_not_found() => {
                debug!(hash = %self.hash, "Transaction unknown to the provider");
                None
            }
            Err(e) => {
                warn!(hash = %self.hash, error = %e, "Transaction lookup failed");
                None
            }
        }
    }
}

fn backoff(retry_delay: Duration, retry_count: usize) -> ExponentialBuilder {
    ExponentialBuilder::default().with_min_delay(retry_delay).with_max_times(retry_count)
}

/// `block` with transaction bodies, re-fetched while the provider has not indexed it.
async fn full_block<P: ChainProvider>(
    provider: &P,
    block: &Block,
    backoff: ExponentialBuilder,
) -> Result<Block, ProviderError> {
    if block.transactions.is_full() {
        return Ok(block.clone());
    }

    let id = BlockId::hash(block.hash);
    (|| provider.get_block(id, true))
        .retry(backoff)
        .sleep(sleep)
        .when(|e: &ProviderError| matches!(e, ProviderError::BlockNotFound(_)))
        .await
}

/// Waits until the transaction `options.hash` is mined and has `options.confirmations`
/// confirmations, and returns its receipt.
///
/// If another transaction from the same sender with the same nonce gets mined instead, the
/// `on_replaced` callback is invoked and the replacement's receipt is awaited and returned.
///
/// # Errors
///
/// * [`WatchError::Aborted`] if the signal is cancelled, before any provider call when it already
///   is on entry.
/// * [`WatchError::ReceiptTimeout`] once the timeout elapses.
/// * [`WatchError::Provider`] if looking up the replacing transaction's block or receipt fails.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub async fn wait_for_transaction_receipt<P>(
    provider: P,
    options: WaitForReceiptOptions,
) -> Result<TransactionReceipt, WatchError>
where
    P: ChainProvider + Clone + 'static,
{
    let WaitForReceiptOptions {
        hash,
        confirmations,
        timeout,
        polling_interval,
        check_replacement,
        on_replaced,
        signal,
        retry_count,
        retry_delay,
    } = options;

    let signal = signal.unwrap_or_default();
    if signal.is_cancelled() {
        return Err(WatchError::Aborted);
    }

    debug!(
        hash = %hash,
        confirmations = confirmations,
        timeout = ?timeout,
        check_replacement = check_replacement,
        "Waiting for transaction receipt"
    );

    let (tick_tx, mut ticks) = mpsc::unbounded_channel();
    let tick_source = watch_blocks(
        provider.clone(),
        BlockWatchOptions::new()
            .poll(true)
            .polling_interval(polling_interval)
            .emit_on_begin(true)
            .emit_missed(true)
            .include_transactions(check_replacement)
            .on_error(move |e| warn!(hash = %hash, error = %e, "Block poll failed")),
        move |block, _| {
            let _ = tick_tx.send(block);
        },
    );

    let mut waiter = ReceiptWaiter {
        provider: &provider,
        hash,
        confirmations,
        check_replacement,
        on_replaced,
        retry_count,
        retry_delay,
        transaction_looked_up: false,
        state: WaitState::Pending { transaction: None },
    };

    let deadline = async {
        match timeout {
            Some(timeout) => sleep(timeout).await,
            None => pending().await,
        }
    };

    let result = tokio::select! {
        biased;

        () = signal.cancelled() => Err(WatchError::Aborted),
        () = deadline => Err(WatchError::ReceiptTimeout { hash }),
        result = waiter.run(&mut ticks) => result,
    };

    tick_source.stop();

    match &result {
        Ok(receipt) => {
            debug!(hash = %hash, block_number = receipt.block_number, "Transaction confirmed");
        }
        Err(WatchError::Aborted) => debug!(hash = %hash, "Receipt wait aborted"),
        Err(e) => error!(hash = %hash, error = %e, "Receipt wait failed"),
    }

    result
}
