//! Chain data access consumed by the watchers.
//!
//! Watchers only talk to the chain through [`ChainProvider`]: four request/response calls plus an
//! optional new-heads subscription. [`RpcProvider`] implements it on top of an alloy
//! [`RootProvider`](alloy::providers::RootProvider), adding per-call timeouts and exponential
//! backoff retries.
//!
//! # Examples
//!
//! ```rust,no_run
//! use alloy::providers::ProviderBuilder;
//! use chain_watch::provider::{ChainProvider, RpcProviderBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ws = ProviderBuilder::new().connect("ws://localhost:8545").await?;
//!
//! let provider = RpcProviderBuilder::new(ws)
//!     .call_timeout(Duration::from_secs(10))
//!     .subscription_timeout(Duration::from_secs(60))
//!     .build()
//!     .await?;
//!
//! println!("Current block: {}", provider.get_block_number().await?);
//! # Ok(()) }
//! ```

pub mod builder;
pub mod conversion;
mod error;
pub mod rpc;
pub mod subscription;

use std::{pin::Pin, sync::Arc};

use alloy::{
    eips::BlockId,
    primitives::{BlockNumber, TxHash},
};
use tokio_stream::Stream;

pub use builder::*;
pub use conversion::IntoRootProvider;
pub use error::ProviderError;
pub use rpc::RpcProvider;
pub use subscription::HeadSubscription;

use crate::types::{Block, Transaction, TransactionReceipt, TransactionSelector};

/// Stream of new chain heads. Dropping it unsubscribes.
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<Block, ProviderError>> + Send>>;

/// Read access to a chain data provider.
///
/// Implementations are shared between watchers through cheap clones and must not keep
/// per-watcher state.
pub trait ChainProvider: Send + Sync {
    /// Number of the most recent block.
    fn get_block_number(&self) -> impl Future<Output = Result<BlockNumber, ProviderError>> + Send;

    /// Fetches a block, with full transaction bodies when `full_transactions` is set.
    ///
    /// Fails with [`ProviderError::BlockNotFound`] if `id` does not resolve.
    fn get_block(
        &self,
        id: BlockId,
        full_transactions: bool,
    ) -> impl Future<Output = Result<Block, ProviderError>> + Send;

    /// Fails with [`ProviderError::TransactionNotFound`] if nothing matches `selector`.
    fn get_transaction(
        &self,
        selector: TransactionSelector,
    ) -> impl Future<Output = Result<Transaction, ProviderError>> + Send;

    /// Fails with [`ProviderError::ReceiptNotFound`] while the transaction is pending.
    fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<TransactionReceipt, ProviderError>> + Send;

    /// Whether [`ChainProvider::subscribe_new_heads`] is available.
    fn supports_subscriptions(&self) -> bool {
        false
    }

    /// Subscribes to new chain heads.
    ///
    /// Heads may carry only transaction hashes (or none at all); consumers needing bodies fetch
    /// the block again.
    fn subscribe_new_heads(&self) -> impl Future<Output = Result<HeadStream, ProviderError>> + Send {
        async { Err(ProviderError::SubscriptionsUnsupported) }
    }
}

impl<P: ChainProvider> ChainProvider for Arc<P> {
    fn get_block_number(&self) -> impl Future<Output = Result<BlockNumber, ProviderError>> + Send {
        (**self).get_block_number()
    }

    fn get_block(
        &self,
        id: BlockId,
        full_transactions: bool,
    ) -> impl Future<Output = Result<Block, ProviderError>> + Send {
        (**self).get_block(id, full_transactions)
    }

    fn get_transaction(
        &self,
        selector: TransactionSelector,
    ) -> impl Future<Output = Result<Transaction, ProviderError>> + Send {
        (**self).get_transaction(selector)
    }

    fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<TransactionReceipt, ProviderError>> + Send {
        (**self).get_transaction_receipt(hash)
    }

    fn supports_subscriptions(&self) -> bool {
        (**self).supports_subscriptions()
    }

    fn subscribe_new_heads(&self) -> impl Future<Output = Result<HeadStream, ProviderError>> + Send {
        (**self).subscribe_new_heads()
    }
}
