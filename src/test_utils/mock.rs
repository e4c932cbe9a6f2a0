use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{B256, BlockHash, BlockNumber, TxHash, keccak256},
    transports::{RpcError, TransportErrorKind},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    provider::{ChainProvider, HeadStream, ProviderError},
    types::{Block, BlockTransactions, Transaction, TransactionReceipt, TransactionSelector},
};

type HeadSender = mpsc::UnboundedSender<Result<Block, ProviderError>>;

/// In-memory chain implementing [`ChainProvider`].
///
/// Blocks are mined explicitly with [`MockProvider::mine`]. Clones share the same chain.
#[derive(Clone, Debug, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    blocks: BTreeMap<BlockNumber, Block>,
    orphans: Vec<Block>,
    mempool: HashMap<TxHash, Transaction>,
    mined: HashMap<TxHash, Transaction>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    scripted_numbers: VecDeque<Result<BlockNumber, ProviderError>>,
    last_scripted: Option<BlockNumber>,
    failing_blocks: usize,
    failing_transactions: usize,
    failing_receipts: usize,
    failing_receipt_hashes: HashSet<TxHash>,
    subscriptions: bool,
    subscribers: Vec<HeadSender>,
    hash_seed: u64,
    calls: HashMap<&'static str, usize>,
}

impl MockState {
    fn head(&self) -> &Block {
        self.blocks.values().next_back().expect("mock chain always has a genesis block")
    }

    fn next_hash(&mut self) -> BlockHash {
        self.hash_seed += 1;
        keccak256(self.hash_seed.to_be_bytes())
    }

    fn count(&mut self, method: &'static str) {
        *self.calls.entry(method).or_default() += 1;
    }

    fn resolve(&self, id: BlockId) -> Option<&Block> {
        match id {
            BlockId::Hash(hash) => self
                .blocks
                .values()
                .chain(self.orphans.iter())
                .find(|block| block.hash == hash.block_hash),
            BlockId::Number(tag) => self.resolve_tag(tag),
        }
    }

    fn resolve_tag(&self, tag: BlockNumberOrTag) -> Option<&Block> {
        match tag {
            BlockNumberOrTag::Number(number) => self.blocks.get(&number),
            BlockNumberOrTag::Earliest => self.blocks.get(&0),
            _ => Some(self.head()),
        }
    }

    fn broadcast(&mut self, head: &Block) {
        let header = Block { transactions: BlockTransactions::default(), ..head.clone() };
        self.subscribers.retain(|tx| tx.send(Ok(header.clone())).is_ok());
    }
}

fn injected_failure() -> ProviderError {
    RpcError::<TransportErrorKind>::Transport(TransportErrorKind::BackendGone).into()
}

impl MockProvider {
    /// Chain containing only an empty genesis block.
    #[must_use]
    pub fn new() -> Self {
        let provider = Self::default();
        {
            let mut state = provider.state();
            let hash = state.next_hash();
            let genesis =
                Block { hash, transactions: BlockTransactions::Full(Vec::new()), ..Block::default() };
            state.blocks.insert(0, genesis);
        }
        provider
    }

    /// Advertise push subscriptions.
    #[must_use]
    pub fn with_subscriptions(self) -> Self {
        self.state().subscriptions = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Makes the next `eth_blockNumber` calls return `numbers` in order, then keep returning the
    /// last one.
    pub fn push_block_numbers(&self, numbers: impl IntoIterator<Item = BlockNumber>) {
        self.state().scripted_numbers.extend(numbers.into_iter().map(Ok));
    }

    /// Makes the next scripted `eth_blockNumber` call fail.
    pub fn push_block_number_error(&self, error: ProviderError) {
        self.state().scripted_numbers.push_back(Err(error));
    }

    /// Makes the next `n` block fetches fail with a transport error.
    pub fn fail_next_blocks(&self, n: usize) {
        self.state().failing_blocks = n;
    }

    /// Makes the next `n` transaction lookups fail with a transport error.
    pub fn fail_next_transactions(&self, n: usize) {
        self.state().failing_transactions = n;
    }

    /// Makes the next `n` receipt lookups fail with a transport error.
    pub fn fail_next_receipts(&self, n: usize) {
        self.state().failing_receipts = n;
    }

    /// Makes every receipt lookup for `hash` fail with a transport error.
    pub fn fail_receipts_for(&self, hash: TxHash) {
        self.state().failing_receipt_hashes.insert(hash);
    }

    /// Adds `tx` to the mempool, making it visible to `get_transaction`.
    pub fn submit(&self, tx: Transaction) {
        self.state().mempool.insert(tx.hash, tx);
    }

    /// Mines a block on top of the head containing `txs`, in order.
    ///
    /// Every included transaction gets a successful receipt. Pending transactions sharing a sender
    /// and nonce with an included one leave the mempool. Subscribers receive the new head.
    pub fn mine(&self, txs: Vec<Transaction>) -> Block {
        let mut state = self.state();
        let parent = state.head().clone();
        let number = parent.number + 1;
        let hash = state.next_hash();

        let mut included = Vec::with_capacity(txs.len());
        for (index, mut tx) in txs.into_iter().enumerate() {
            tx.block_hash = Some(hash);
            tx.block_number = Some(number);
            tx.transaction_index = Some(index as u64);

            let slot = tx.pending_ref();
            state.mempool.retain(|_, pending| !slot.same_slot(pending));
            state.receipts.insert(
                tx.hash,
                TransactionReceipt {
                    transaction_hash: tx.hash,
                    block_hash: hash,
                    block_number: number,
                    transaction_index: index as u64,
                    from: tx.from,
                    to: tx.to,
                    contract_address: None,
                    status: true,
                    gas_used: 21_000,
                    effective_gas_price: tx.gas_price.unwrap_or(tx.max_fee_per_gas),
                },
            );
            state.mined.insert(tx.hash, tx.clone());
            included.push(tx);
        }

        let block = Block {
            number,
            hash,
            parent_hash: parent.hash,
            timestamp: parent.timestamp + 12,
            transactions: BlockTransactions::Full(included),
        };
        state.blocks.insert(number, block.clone());
        state.broadcast(&block);
        block
    }

    /// Mines a block without transactions.
    pub fn mine_empty(&self) -> Block {
        self.mine(Vec::new())
    }

    /// Mines `n` empty blocks and returns the last one.
    pub fn mine_blocks(&self, n: usize) -> Block {
        let mut head = self.head();
        for _ in 0..n {
            head = self.mine_empty();
        }
        head
    }

    /// Replaces the head with an empty sibling at the same height.
    ///
    /// Transactions of the old head return to the mempool and lose their receipts.
    pub fn reorg_head(&self) -> Block {
        let mut state = self.state();
        let old = state.head().clone();
        let hash = state.next_hash();

        if let Some(txs) = old.transactions.as_transactions() {
            for tx in txs {
                state.receipts.remove(&tx.hash);
                if let Some(mut tx) = state.mined.remove(&tx.hash) {
                    tx.block_hash = None;
                    tx.block_number = None;
                    tx.transaction_index = None;
                    state.mempool.insert(tx.hash, tx);
                }
            }
        }

        let block =
            Block { hash, transactions: BlockTransactions::Full(Vec::new()), ..old.clone() };
        state.orphans.push(old);
        state.blocks.insert(block.number, block.clone());
        state.broadcast(&block);
        block
    }

    /// Makes a block unavailable, as if the node had not indexed it.
    pub fn remove_block(&self, number: BlockNumber) {
        self.state().blocks.remove(&number);
    }

    /// Ends every open head subscription.
    pub fn close_subscriptions(&self) {
        self.state().subscribers.clear();
    }

    /// Sends `error` to every open head subscription.
    pub fn push_head_error(&self, error: ProviderError) {
        self.state().subscribers.retain(|tx| tx.send(Err(error.clone())).is_ok());
    }

    /// Sends a head for `block` to every open subscription without touching the chain.
    pub fn push_head(&self, block: &Block) {
        self.state().broadcast(block);
    }

    #[must_use]
    pub fn head(&self) -> Block {
        self.state().head().clone()
    }

    /// Number of calls made to `method`, e.g. `"get_transaction_receipt"`.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or_default()
    }

    /// Number of calls made to any method.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Number of currently open head subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }
}

impl ChainProvider for MockProvider {
    async fn get_block_number(&self) -> Result<BlockNumber, ProviderError> {
        let mut state = self.state();
        state.count("get_block_number");
        match state.scripted_numbers.pop_front() {
            Some(Ok(number)) => {
                state.last_scripted = Some(number);
                Ok(number)
            }
            Some(Err(e)) => Err(e),
            None => Ok(state.last_scripted.unwrap_or(state.head().number)),
        }
    }

    async fn get_block(&self, id: BlockId, full_transactions: bool) -> Result<Block, ProviderError> {
        let mut state = self.state();
        state.count("get_block");
        if state.failing_blocks > 0 {
            state.failing_blocks -= 1;
            return Err(injected_failure());
        }

        let block = state.resolve(id).cloned().ok_or(ProviderError::BlockNotFound(id))?;
        if full_transactions {
            Ok(block)
        } else {
            Ok(Block { transactions: block.transactions.into_hashes(), ..block })
        }
    }

    async fn get_transaction(
        &self,
        selector: TransactionSelector,
    ) -> Result<Transaction, ProviderError> {
        let mut state = self.state();
        state.count("get_transaction");
        if state.failing_transactions > 0 {
            state.failing_transactions -= 1;
            return Err(injected_failure());
        }

        let found = match selector {
            TransactionSelector::Hash(hash) => {
                state.mined.get(&hash).or_else(|| state.mempool.get(&hash)).cloned()
            }
            TransactionSelector::BlockHashAndIndex(hash, index) => state
                .resolve(BlockId::hash(hash))
                .and_then(|block| nth_transaction(block, index)),
            TransactionSelector::BlockNumberAndIndex(tag, index) => {
                state.resolve_tag(tag).and_then(|block| nth_transaction(block, index))
            }
        };
        found.ok_or(ProviderError::TransactionNotFound(selector))
    }

    async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<TransactionReceipt, ProviderError> {
        let mut state = self.state();
        state.count("get_transaction_receipt");
        if state.failing_receipts > 0 {
            state.failing_receipts -= 1;
            return Err(injected_failure());
        }
        if state.failing_receipt_hashes.contains(&hash) {
            return Err(injected_failure());
        }

        state.receipts.get(&hash).cloned().ok_or(ProviderError::ReceiptNotFound(hash))
    }

    fn supports_subscriptions(&self) -> bool {
        self.state().subscriptions
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ProviderError> {
        let mut state = self.state();
        state.count("subscribe_new_heads");
        if !state.subscriptions {
            return Err(ProviderError::SubscriptionsUnsupported);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

fn nth_transaction(block: &Block, index: u64) -> Option<Transaction> {
    let index = usize::try_from(index).ok()?;
    block.transactions.as_transactions()?.get(index).cloned()
}

/// Deterministic transaction hash for tests.
#[must_use]
pub fn tx_hash(seed: u8) -> TxHash {
    B256::with_last_byte(seed)
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};

    use super::*;

    fn transfer(seed: u8, nonce: u64) -> Transaction {
        Transaction {
            hash: tx_hash(seed),
            from: Address::with_last_byte(1),
            nonce,
            to: Some(Address::with_last_byte(2)),
            value: U256::from(1),
            ..Transaction::default()
        }
    }

    #[tokio::test]
    async fn mining_produces_receipts_and_clears_mempool() {
        let provider = MockProvider::new();
        provider.submit(transfer(1, 0));
        provider.submit(transfer(2, 0));

        let block = provider.mine(vec![transfer(2, 0)]);

        let receipt = provider.get_transaction_receipt(tx_hash(2)).await.unwrap();
        assert_eq!(receipt.block_number, block.number);
        assert!(matches!(
            provider.get_transaction(tx_hash(1).into()).await,
            Err(ProviderError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn hashes_only_unless_full_requested() {
        let provider = MockProvider::new();
        let block = provider.mine(vec![transfer(1, 0)]);

        let light = provider.get_block(BlockId::number(block.number), false).await.unwrap();
        let full = provider.get_block(BlockId::hash(block.hash), true).await.unwrap();

        assert_eq!(light.transactions, BlockTransactions::Hashes(vec![tx_hash(1)]));
        assert!(full.transactions.is_full());
    }

    #[tokio::test]
    async fn scripted_numbers_repeat_the_last_value() {
        let provider = MockProvider::new();
        provider.push_block_numbers([5, 7]);

        assert_eq!(provider.get_block_number().await.unwrap(), 5);
        assert_eq!(provider.get_block_number().await.unwrap(), 7);
        assert_eq!(provider.get_block_number().await.unwrap(), 7);
        assert_eq!(provider.calls("get_block_number"), 3);
    }

    #[tokio::test]
    async fn reorged_head_keeps_height_and_changes_hash() {
        let provider = MockProvider::new();
        let mined = provider.mine(vec![transfer(1, 0)]);

        let replacement = provider.reorg_head();

        assert_eq!(replacement.number, mined.number);
        assert_ne!(replacement.hash, mined.hash);
        assert!(provider.get_transaction_receipt(tx_hash(1)).await.is_err());
        assert!(provider.get_block(BlockId::hash(mined.hash), false).await.is_ok());
    }
}
