#![allow(dead_code)]

use alloy::{
    consensus,
    network::Ethereum,
    primitives::{Address, B256, BlockHash, Bloom, TxHash},
    providers::{RootProvider, mock::Asserter},
    rpc::{client::RpcClient, types as rpc},
};
use chain_watch::provider::{RpcProvider, RpcProviderBuilder};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
}

/// Provider backed by alloy's mocked transport, with retries disabled.
pub async fn mocked_provider(asserter: Asserter) -> anyhow::Result<RpcProvider> {
    init_tracing();
    let root = RootProvider::<Ethereum>::new(RpcClient::mocked(asserter));
    Ok(RpcProviderBuilder::fragile(root).build().await?)
}

pub fn block_hash(number: u64) -> BlockHash {
    B256::left_padding_from(&number.to_be_bytes())
}

pub fn rpc_block(number: u64, hash: BlockHash, transactions: Vec<TxHash>) -> rpc::Block {
    rpc::Block {
        header: rpc::Header {
            hash,
            inner: consensus::Header {
                number,
                parent_hash: block_hash(number.saturating_sub(1)),
                ..Default::default()
            },
            total_difficulty: None,
            size: None,
        },
        uncles: vec![],
        transactions: rpc::BlockTransactions::<rpc::Transaction>::Hashes(transactions),
        withdrawals: None,
    }
}

/// A successful legacy receipt as a node would return it from `eth_getTransactionReceipt`.
pub fn receipt_json(hash: TxHash, number: u64) -> Value {
    json!({
        "type": "0x0",
        "status": "0x1",
        "cumulativeGasUsed": "0x5208",
        "logs": [],
        "logsBloom": Bloom::ZERO,
        "transactionHash": hash,
        "transactionIndex": "0x0",
        "blockHash": block_hash(number),
        "blockNumber": format!("{number:#x}"),
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x3b9aca00",
        "from": Address::with_last_byte(0xaa),
        "to": Address::with_last_byte(0xbb),
        "contractAddress": null,
    })
}
