//! Detection of transactions replaced by another one with the same sender and nonce.

use alloy::eips::BlockId;

use crate::{
    provider::{ChainProvider, ProviderError},
    types::{Block, ReplacementInfo, ReplacementReason, Transaction},
};

/// Classifies how `replacement` relates to the `original` transaction it replaced.
///
/// * [`ReplacementReason::Repriced`]: same recipient, value and calldata, typically a fee bump.
/// * [`ReplacementReason::Cancelled`]: a zero-value transfer from the sender to itself.
/// * [`ReplacementReason::Replaced`]: anything else.
#[must_use]
pub fn classify_replacement(original: &Transaction, replacement: &Transaction) -> ReplacementReason {
    if replacement.to == original.to &&
        replacement.value == original.value &&
        replacement.input == original.input
    {
        ReplacementReason::Repriced
    } else if replacement.to == Some(original.from) && replacement.value.is_zero() {
        ReplacementReason::Cancelled
    } else {
        ReplacementReason::Replaced
    }
}

/// Looks for a transaction in `block` that took the nonce of `original`.
///
/// Returns `Ok(None)` when the block holds no transaction from the same sender with the same
/// nonce, or when that transaction is `original` itself. Blocks without transaction bodies are
/// fetched again by hash.
///
/// # Errors
///
/// Fails when re-fetching the block or fetching the replacement's receipt fails. Neither call is
/// retried.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub async fn detect_replacement<P: ChainProvider>(
    provider: &P,
    original: &Transaction,
    block: &Block,
) -> Result<Option<ReplacementInfo>, ProviderError> {
    let fetched;
    let block = if block.transactions.is_full() {
        block
    } else {
        fetched = provider.get_block(BlockId::hash(block.hash), true).await?;
        &fetched
    };

    let slot = original.pending_ref();
    let Some(replacement) = block
        .transactions
        .as_transactions()
        .into_iter()
        .flatten()
        .find(|tx| slot.same_slot(tx))
    else {
        return Ok(None);
    };

    if replacement.hash == original.hash {
        return Ok(None);
    }

    let reason = classify_replacement(original, replacement);
    debug!(
        original = %original.hash,
        replacement = %replacement.hash,
        block_number = block.number,
        reason = %reason,
        "Transaction replaced"
    );

    let receipt = provider.get_transaction_receipt(replacement.hash).await?;

    Ok(Some(ReplacementInfo {
        reason,
        replaced_transaction: original.clone(),
        transaction: replacement.clone(),
        transaction_receipt: receipt,
    }))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, Bytes, U256};

    use super::*;
    use crate::test_utils::{MockProvider, tx_hash};

    fn sender() -> Address {
        Address::with_last_byte(0xaa)
    }

    fn original() -> Transaction {
        Transaction {
            hash: tx_hash(1),
            from: sender(),
            nonce: 7,
            to: Some(Address::with_last_byte(0xbb)),
            value: U256::from(100),
            input: Bytes::from_static(&[0x12, 0x34]),
            max_fee_per_gas: 10,
            ..Transaction::default()
        }
    }

    #[test]
    fn fee_bump_is_repriced() {
        let replacement = Transaction { hash: tx_hash(2), max_fee_per_gas: 20, ..original() };

        assert_eq!(classify_replacement(&original(), &replacement), ReplacementReason::Repriced);
    }

    #[test]
    fn zero_value_self_transfer_is_cancelled() {
        let replacement = Transaction {
            hash: tx_hash(2),
            to: Some(sender()),
            value: U256::ZERO,
            input: Bytes::new(),
            ..original()
        };

        assert_eq!(classify_replacement(&original(), &replacement), ReplacementReason::Cancelled);
    }

    #[test]
    fn different_payload_is_replaced() {
        let new_recipient =
            Transaction { hash: tx_hash(2), to: Some(Address::with_last_byte(0xcc)), ..original() };
        let new_value = Transaction { hash: tx_hash(3), value: U256::from(1), ..original() };
        let self_transfer_with_value =
            Transaction { hash: tx_hash(4), to: Some(sender()), ..original() };

        for replacement in [new_recipient, new_value, self_transfer_with_value] {
            assert_eq!(
                classify_replacement(&original(), &replacement),
                ReplacementReason::Replaced
            );
        }
    }

    #[tokio::test]
    async fn finds_replacement_in_block() {
        let provider = MockProvider::new();
        provider.submit(original());
        let replacement = Transaction { hash: tx_hash(2), max_fee_per_gas: 20, ..original() };
        let block = provider.mine(vec![replacement.clone()]);

        let info = detect_replacement(&provider, &original(), &block).await.unwrap().unwrap();

        assert_eq!(info.reason, ReplacementReason::Repriced);
        assert_eq!(info.replaced_transaction, original());
        assert_eq!(info.transaction.hash, replacement.hash);
        assert_eq!(info.transaction_receipt.transaction_hash, replacement.hash);
        assert_eq!(info.transaction_receipt.block_number, block.number);
    }

    #[tokio::test]
    async fn original_itself_is_not_a_replacement() {
        let provider = MockProvider::new();
        let block = provider.mine(vec![original()]);

        assert!(detect_replacement(&provider, &original(), &block).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_nonces_are_ignored() {
        let provider = MockProvider::new();
        let next_nonce = Transaction { hash: tx_hash(2), nonce: 8, ..original() };
        let block = provider.mine(vec![next_nonce]);

        assert!(detect_replacement(&provider, &original(), &block).await.unwrap().is_none());
        assert_eq!(provider.calls("get_transaction_receipt"), 0);
    }

    #[tokio::test]
    async fn hash_only_blocks_are_fetched_with_bodies() {
        let provider = MockProvider::new();
        let replacement =
            Transaction { hash: tx_hash(2), to: Some(sender()), value: U256::ZERO, ..original() };
        let mined = provider.mine(vec![replacement]);
        let header = Block { transactions: mined.transactions.clone().into_hashes(), ..mined };

        let info = detect_replacement(&provider, &original(), &header).await.unwrap().unwrap();

        assert_eq!(info.reason, ReplacementReason::Cancelled);
        assert_eq!(provider.calls("get_block"), 1);
    }

    #[tokio::test]
    async fn receipt_errors_propagate() {
        let provider = MockProvider::new();
        let replacement = Transaction { hash: tx_hash(2), max_fee_per_gas: 20, ..original() };
        let block = provider.mine(vec![replacement]);
        provider.fail_next_receipts(1);

        let result = detect_replacement(&provider, &original(), &block).await;

        assert!(matches!(result, Err(ProviderError::RpcError(_))));
    }
}
