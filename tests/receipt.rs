mod common;

use std::time::Duration;

use alloy::{primitives::B256, providers::mock::Asserter};
use chain_watch::{WaitForReceiptOptions, WatchError, wait_for_transaction_receipt};
use tokio_util::sync::CancellationToken;

use crate::common::{block_hash, mocked_provider, receipt_json, rpc_block};

#[tokio::test]
async fn resolves_with_receipt_of_mined_transaction() -> anyhow::Result<()> {
    let hash = B256::with_last_byte(0x11);
    let asserter = Asserter::new();
    asserter.push_success(&rpc_block(50, block_hash(50), vec![hash]));
    asserter.push_success(&receipt_json(hash, 50));
    let provider = mocked_provider(asserter).await?;

    let receipt = wait_for_transaction_receipt(
        provider,
        WaitForReceiptOptions::new(hash)
            .check_replacement(false)
            .polling_interval(Duration::from_secs(1))
            .timeout(Duration::from_secs(5)),
    )
    .await?;

    assert_eq!(receipt.transaction_hash, hash);
    assert_eq!(receipt.block_number, 50);
    assert_eq!(receipt.block_hash, block_hash(50));
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 21_000);
    Ok(())
}

#[tokio::test]
async fn cancelled_signal_aborts_before_any_request() -> anyhow::Result<()> {
    let provider = mocked_provider(Asserter::new()).await?;
    let signal = CancellationToken::new();
    signal.cancel();

    let result = wait_for_transaction_receipt(
        provider,
        WaitForReceiptOptions::new(B256::with_last_byte(0x22)).signal(signal),
    )
    .await;

    assert!(matches!(result, Err(WatchError::Aborted)));
    Ok(())
}
