//! chain-watch is a library for following an EVM chain from the client side.
//!
//! It provides three building blocks on top of a [`ChainProvider`]:
//!
//! * [`watch_block_number`] reports every new block number, with optional backfill of skipped
//!   numbers.
//! * [`watch_blocks`] reports every new block, de-duplicated on `(number, hash)`.
//! * [`wait_for_transaction_receipt`] waits until a transaction is mined and confirmed, and keeps
//!   waiting on the replacement when the transaction gets sped up, cancelled or replaced.
//!
//! Watchers run on their own tokio task and report through callbacks. Each returns a
//! [`WatchHandle`]; stopping or dropping it stops the watcher.
//!
//! # Delivery modes
//!
//! Watchers subscribe to new heads when the provider supports it and poll otherwise. Both modes
//! feed the same de-duplication, so consumers see the same sequence either way. Receipt waits
//! always poll.
//!
//! # Providers
//!
//! The [`provider`] module defines [`ChainProvider`] and implements it for alloy through
//! [`provider::RpcProvider`], which adds per-call timeouts and exponential backoff retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use chain_watch::{
//!     BlockNumberWatchOptions, WaitForReceiptOptions, provider::RpcProviderBuilder,
//!     wait_for_transaction_receipt, watch_block_number,
//! };
//! use alloy::primitives::b256;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = RpcProviderBuilder::new("ws://localhost:8545").build().await?;
//!
//! let _handle = watch_block_number(
//!     provider.clone(),
//!     BlockNumberWatchOptions::new().emit_missed(true),
//!     |number, previous| println!("block {number} (previous {previous:?})"),
//! );
//!
//! let hash = b256!("0x9d1b7b9ab5fe2a1e8c5b0a4a27e3e1b7f6b5b8a9c0d1e2f30415263748596a7b");
//! let receipt = wait_for_transaction_receipt(
//!     provider,
//!     WaitForReceiptOptions::new(hash)
//!         .confirmations(2)
//!         .on_replaced(|info| println!("replaced: {}", info.reason)),
//! )
//! .await?;
//! println!("mined in block {}", receipt.block_number);
//! # Ok(()) }
//! ```

#[macro_use]
mod logging;

pub mod poller;
pub mod provider;
pub mod watch;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod handle;
mod receipt;
mod replacement;
mod types;

pub use error::WatchError;
pub use handle::WatchHandle;
pub use poller::{PollStep, Poller, poll_fn};
pub use provider::{ChainProvider, ProviderError};
pub use receipt::{
    DEFAULT_RECEIPT_TIMEOUT, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY, WaitForReceiptOptions,
    wait_for_transaction_receipt,
};
pub use replacement::{classify_replacement, detect_replacement};
pub use types::{
    Block, BlockTransactions, PendingTransactionRef, ReplacementInfo, ReplacementReason,
    Transaction, TransactionReceipt, TransactionSelector,
};
pub use watch::{
    BlockNumberWatchOptions, BlockWatchOptions, DEFAULT_POLLING_INTERVAL, OnError,
    watch_block_number, watch_blocks,
};
