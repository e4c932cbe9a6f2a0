use std::{fmt::Debug, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::Ethereum,
    primitives::{BlockNumber, TxHash},
    providers::{Provider, RootProvider},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tokio_stream::StreamExt;

use crate::{
    provider::{ChainProvider, HeadStream, HeadSubscription, ProviderError},
    types::{Block, Transaction, TransactionReceipt, TransactionSelector},
};

/// [`ChainProvider`] backed by an alloy [`RootProvider`].
///
/// Every call is bounded by a total timeout and retried with exponential backoff. `null` results
/// are mapped to the typed not-found errors of [`ProviderError`].
///
/// Build one with [`RpcProviderBuilder`](super::RpcProviderBuilder).
#[derive(Clone, Debug)]
pub struct RpcProvider {
    pub(crate) root: RootProvider<Ethereum>,
    pub(crate) call_timeout: Duration,
    pub(crate) subscription_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
}

impl RpcProvider {
    /// Get a reference to the wrapped provider.
    #[must_use]
    pub fn root(&self) -> &RootProvider<Ethereum> {
        &self.root
    }

    /// Fetch the latest block, without transaction bodies.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_latest_block(&self) -> Result<Block, ProviderError> {
        self.get_block(BlockNumberOrTag::Latest.into(), false).await
    }

    /// Subscribe to new block headers.
    ///
    /// # Errors
    ///
    /// * [`ProviderError::SubscriptionsUnsupported`] if the transport has no pub-sub frontend.
    /// * See [retry errors](#retry-errors).
    pub async fn subscribe_blocks(&self) -> Result<HeadSubscription, ProviderError> {
        if !self.supports_pubsub() {
            return Err(ProviderError::SubscriptionsUnsupported);
        }

        debug!("eth_subscribe called");
        let subscription =
            self.try_operation(|provider| async move { provider.subscribe_blocks().await }).await;

        match subscription {
            Ok(sub) => Ok(HeadSubscription::new(sub, self.subscription_timeout)),
            Err(e) => {
                error!(error = %e, "eth_subscribe failed");
                Err(e)
            }
        }
    }

    /// Execute `operation` with exponential backoff and a total timeout.
    ///
    /// The timeout wraps the retry loop, so the entire operation (including time spent inside the
    /// RPC calls and backoff sleeps) cannot exceed `call_timeout`.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`ProviderError::Timeout`] if `call_timeout` elapses.
    /// * [`ProviderError::RpcError`] with the last transport error once retries are exhausted.
    pub(crate) async fn try_operation<T: Debug, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(RootProvider<Ethereum>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(self.root.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    debug!(error = %err, "RPC error retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(ProviderError::from)?
        .map_err(ProviderError::from)
    }

    fn supports_pubsub(&self) -> bool {
        self.root.client().pubsub_frontend().is_some()
    }
}

impl ChainProvider for RpcProvider {
    async fn get_block_number(&self) -> Result<BlockNumber, ProviderError> {
        trace!("eth_blockNumber called");
        let result =
            self.try_operation(|provider| async move { provider.get_block_number().await }).await;
        if let Err(e) = &result {
            warn!(error = %e, "eth_blockNumber failed");
        }
        result
    }

    async fn get_block(&self, id: BlockId, full_transactions: bool) -> Result<Block, ProviderError> {
        trace!(block_id = %id, full_transactions = full_transactions, "eth_getBlock called");
        let result = self
            .try_operation(|provider| async move {
                let request = provider.get_block(id);
                if full_transactions { request.full().await } else { request.hashes().await }
            })
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "eth_getBlock failed");
        }

        result?.map(Block::from).ok_or(ProviderError::BlockNotFound(id))
    }

    async fn get_transaction(
        &self,
        selector: TransactionSelector,
    ) -> Result<Transaction, ProviderError> {
        trace!(selector = %selector, "eth_getTransaction called");
        let result = self
            .try_operation(|provider| async move {
                match selector {
                    TransactionSelector::Hash(hash) => provider.get_transaction_by_hash(hash).await,
                    TransactionSelector::BlockHashAndIndex(block_hash, index) => {
                        provider
                            .get_transaction_by_block_hash_and_index(block_hash, index_of(index))
                            .await
                    }
                    TransactionSelector::BlockNumberAndIndex(block, index) => {
                        provider
                            .get_transaction_by_block_number_and_index(block, index_of(index))
                            .await
                    }
                }
            })
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "eth_getTransaction failed");
        }

        result?.map(Transaction::from).ok_or(ProviderError::TransactionNotFound(selector))
    }

    async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<TransactionReceipt, ProviderError> {
        trace!(hash = %hash, "eth_getTransactionReceipt called");
        let result = self
            .try_operation(|provider| async move { provider.get_transaction_receipt(hash).await })
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "eth_getTransactionReceipt failed");
        }

        result?.ok_or(ProviderError::ReceiptNotFound(hash))?.try_into()
    }

    fn supports_subscriptions(&self) -> bool {
        self.supports_pubsub()
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ProviderError> {
        let stream = self.subscribe_blocks().await?.into_stream();
        Ok(Box::pin(stream.map(|header| header.map(Block::from))))
    }
}

fn index_of(index: u64) -> usize {
    usize::try_from(index).unwrap_or(usize::MAX)
}
