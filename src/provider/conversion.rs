//! Conversions from alloy providers and RPC types.

use alloy::{
    consensus::Transaction as ConsensusTransaction,
    network::{Ethereum, ReceiptResponse, TransactionResponse},
    providers::{
        DynProvider, Provider, RootProvider,
        fillers::{FillProvider, TxFiller},
        layers::{CacheProvider, CallBatchProvider},
    },
    rpc::types as rpc,
    transports::http::reqwest::Url,
};

use crate::{
    provider::{ProviderError, RpcProvider},
    types::{Block, BlockTransactions, Transaction, TransactionReceipt},
};

/// Conversion trait for types that can be turned into an alloy [`RootProvider`].
///
/// Used by [`RpcProviderBuilder`](super::RpcProviderBuilder) to accept different provider types
/// and connection strings.
pub trait IntoRootProvider {
    /// Convert `self` into a [`RootProvider`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying provider cannot be constructed or connected.
    fn into_root_provider(
        self,
    ) -> impl Future<Output = Result<RootProvider<Ethereum>, ProviderError>> + Send;
}

impl IntoRootProvider for RpcProvider {
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self.root().to_owned())
    }
}

impl IntoRootProvider for RootProvider<Ethereum> {
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self)
    }
}

impl IntoRootProvider for &str {
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(RootProvider::connect(self).await?)
    }
}

impl IntoRootProvider for Url {
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(RootProvider::connect(self.as_str()).await?)
    }
}

impl<F, P> IntoRootProvider for FillProvider<F, P, Ethereum>
where
    F: TxFiller<Ethereum>,
    P: Provider<Ethereum>,
{
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self.root().to_owned())
    }
}

impl<P> IntoRootProvider for CacheProvider<P, Ethereum>
where
    P: Provider<Ethereum>,
{
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self.root().to_owned())
    }
}

impl IntoRootProvider for DynProvider<Ethereum> {
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self.root().to_owned())
    }
}

impl<P> IntoRootProvider for CallBatchProvider<P, Ethereum>
where
    P: Provider<Ethereum> + 'static,
{
    async fn into_root_provider(self) -> Result<RootProvider<Ethereum>, ProviderError> {
        Ok(self.root().to_owned())
    }
}

impl From<rpc::Header> for Block {
    fn from(header: rpc::Header) -> Self {
        Block {
            number: header.inner.number,
            hash: header.hash,
            parent_hash: header.inner.parent_hash,
            timestamp: header.inner.timestamp,
            transactions: BlockTransactions::default(),
        }
    }
}

impl From<rpc::Block> for Block {
    fn from(block: rpc::Block) -> Self {
        let transactions = match block.transactions {
            rpc::BlockTransactions::Full(txs) => {
                BlockTransactions::Full(txs.into_iter().map(Transaction::from).collect())
            }
            rpc::BlockTransactions::Hashes(hashes) => BlockTransactions::Hashes(hashes),
            rpc::BlockTransactions::Uncle => BlockTransactions::default(),
        };
        Block { transactions, ..Block::from(block.header) }
    }
}

impl From<rpc::Transaction> for Transaction {
    fn from(tx: rpc::Transaction) -> Self {
        Transaction {
            hash: TransactionResponse::tx_hash(&tx),
            from: TransactionResponse::from(&tx),
            nonce: ConsensusTransaction::nonce(&tx),
            to: ConsensusTransaction::to(&tx),
            value: ConsensusTransaction::value(&tx),
            input: ConsensusTransaction::input(&tx).clone(),
            gas_limit: ConsensusTransaction::gas_limit(&tx),
            gas_price: ConsensusTransaction::gas_price(&tx),
            max_fee_per_gas: ConsensusTransaction::max_fee_per_gas(&tx),
            max_priority_fee_per_gas: ConsensusTransaction::max_priority_fee_per_gas(&tx),
            block_hash: tx.block_hash,
            block_number: tx.block_number,
            transaction_index: tx.transaction_index,
        }
    }
}

impl TryFrom<rpc::TransactionReceipt> for TransactionReceipt {
    type Error = ProviderError;

    /// Fails with [`ProviderError::ReceiptNotFound`] for receipts not yet attached to a block,
    /// which some nodes return for pending transactions.
    fn try_from(receipt: rpc::TransactionReceipt) -> Result<Self, Self::Error> {
        let (Some(block_hash), Some(block_number)) = (receipt.block_hash, receipt.block_number)
        else {
            return Err(ProviderError::ReceiptNotFound(receipt.transaction_hash));
        };

        Ok(TransactionReceipt {
            transaction_hash: receipt.transaction_hash,
            block_hash,
            block_number,
            transaction_index: receipt.transaction_index.unwrap_or_default(),
            from: receipt.from,
            to: receipt.to,
            contract_address: receipt.contract_address,
            status: ReceiptResponse::status(&receipt),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        })
    }
}
