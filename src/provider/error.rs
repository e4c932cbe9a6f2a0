use std::sync::Arc;

use alloy::{
    eips::BlockId,
    primitives::TxHash,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::types::TransactionSelector;

/// Errors returned by [`ChainProvider`](super::ChainProvider) calls.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    /// A call did not complete within the configured call timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The block selector did not resolve to a block.
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),

    /// No transaction exists for the selector.
    #[error("Transaction with {0} could not be found")]
    TransactionNotFound(TransactionSelector),

    /// The transaction has no receipt yet (still pending, dropped or unknown).
    #[error("Transaction receipt with hash {0} could not be found. The transaction may not be processed on a block yet")]
    ReceiptNotFound(TxHash),

    /// The provider cannot push new heads.
    #[error("Provider does not support subscriptions")]
    SubscriptionsUnsupported,

    /// A new-heads subscription ended.
    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl ProviderError {
    /// Returns `true` for the expected "not there (yet)" errors that drive continued polling.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::BlockNotFound(_) |
                ProviderError::TransactionNotFound(_) |
                ProviderError::ReceiptNotFound(_)
        )
    }
}

impl From<RpcError<TransportErrorKind>> for ProviderError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        ProviderError::RpcError(Arc::new(error))
    }
}

impl From<tokio::time::error::Elapsed> for ProviderError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProviderError::Timeout
    }
}
