//! Chain data types observed by the watchers.
//!
//! These are the provider-agnostic shapes the watchers reason about. The alloy-backed provider
//! converts alloy's RPC types into them (see [`crate::provider::RpcProvider`]).

use std::fmt;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, BlockHash, BlockNumber, Bytes, TxHash, U256},
};

/// A block as returned by the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub transactions: BlockTransactions,
}

impl Block {
    /// The `(number, hash)` pair a block is de-duplicated on.
    #[must_use]
    pub fn identity(&self) -> (BlockNumber, BlockHash) {
        (self.number, self.hash)
    }
}

/// Transactions of a block, either as hashes only or fully populated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockTransactions {
    Hashes(Vec<TxHash>),
    Full(Vec<Transaction>),
}

impl Default for BlockTransactions {
    fn default() -> Self {
        BlockTransactions::Hashes(Vec::new())
    }
}

impl BlockTransactions {
    /// Returns the full transactions, if the block was fetched with them.
    #[must_use]
    pub fn as_transactions(&self) -> Option<&[Transaction]> {
        match self {
            BlockTransactions::Full(txs) => Some(txs),
            BlockTransactions::Hashes(_) => None,
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, BlockTransactions::Full(_))
    }

    /// Hashes of all transactions in the block, in block order.
    #[must_use]
    pub fn hashes(&self) -> Vec<TxHash> {
        match self {
            BlockTransactions::Hashes(hashes) => hashes.clone(),
            BlockTransactions::Full(txs) => txs.iter().map(|tx| tx.hash).collect(),
        }
    }

    /// Drops transaction bodies, keeping only their hashes.
    #[must_use]
    pub fn into_hashes(self) -> Self {
        match self {
            BlockTransactions::Full(txs) => {
                BlockTransactions::Hashes(txs.into_iter().map(|tx| tx.hash).collect())
            }
            hashes @ BlockTransactions::Hashes(_) => hashes,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            BlockTransactions::Hashes(hashes) => hashes.len(),
            BlockTransactions::Full(txs) => txs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A transaction, either still pending or mined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    /// Set for legacy and EIP-2930 transactions.
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: Option<u128>,
    pub block_hash: Option<BlockHash>,
    pub block_number: Option<BlockNumber>,
    pub transaction_index: Option<u64>,
}

impl Transaction {
    /// Returns `true` once the transaction has been included in a block.
    #[must_use]
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }

    /// The identity a not-yet-mined transaction is tracked under for replacement purposes.
    #[must_use]
    pub fn pending_ref(&self) -> PendingTransactionRef {
        PendingTransactionRef { hash: self.hash, from: self.from, nonce: self.nonce }
    }
}

/// `(hash, sender, nonce)` of a transaction whose receipt is still absent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingTransactionRef {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
}

impl PendingTransactionRef {
    /// Returns `true` if `tx` occupies the same sender/nonce slot.
    #[must_use]
    pub fn same_slot(&self, tx: &Transaction) -> bool {
        tx.from == self.from && tx.nonce == self.nonce
    }
}

/// Receipt of a mined transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_hash: BlockHash,
    pub block_number: BlockNumber,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    /// `true` if execution succeeded.
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// Selects a single transaction.
///
/// [`TransactionSelector::BlockNumberAndIndex`] covers both numbered blocks and block tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionSelector {
    Hash(TxHash),
    BlockHashAndIndex(BlockHash, u64),
    BlockNumberAndIndex(BlockNumberOrTag, u64),
}

impl From<TxHash> for TransactionSelector {
    fn from(hash: TxHash) -> Self {
        TransactionSelector::Hash(hash)
    }
}

impl fmt::Display for TransactionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionSelector::Hash(hash) => write!(f, "hash {hash}"),
            TransactionSelector::BlockHashAndIndex(block, index) => {
                write!(f, "index {index} of block {block}")
            }
            TransactionSelector::BlockNumberAndIndex(block, index) => {
                write!(f, "index {index} of block {block}")
            }
        }
    }
}

/// Why a transaction was superseded by another one from the same sender and nonce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReplacementReason {
    /// Same destination, data and value, different fees.
    Repriced,
    /// Different destination, data or value.
    Replaced,
    /// A zero-value transfer back to the sender.
    Cancelled,
}

impl fmt::Display for ReplacementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplacementReason::Repriced => "repriced",
            ReplacementReason::Replaced => "replaced",
            ReplacementReason::Cancelled => "cancelled",
        })
    }
}

/// Details handed to `on_replaced` when a wait detects a replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplacementInfo {
    pub reason: ReplacementReason,
    /// The transaction the wait was started for.
    pub replaced_transaction: Transaction,
    /// The transaction now occupying its sender/nonce slot.
    pub transaction: Transaction,
    /// Receipt of [`ReplacementInfo::transaction`].
    pub transaction_receipt: TransactionReceipt,
}
