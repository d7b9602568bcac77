//! The user-operation receipt wire shape.
//!
//! Receipts are synthesised from chain state rather than returned by any
//! node, so the conversions here double as schema validation: every field a
//! consumer relies on must be present in the raw chain data or the
//! conversion fails with the missing field's name.

use crate::chain::TransactionReceiptData;
use alloy::{
    primitives::{Address, Bloom, Bytes, TxHash, B256, U256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw log failed validation against the receipt wire schema.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReceiptSchemaError {
    /// A log was missing a required topology field.
    #[error("log failed schema validation: missing `{0}`")]
    MissingLogField(&'static str),
    /// The receipt was missing a required field.
    #[error("receipt failed schema validation: missing `{0}`")]
    MissingReceiptField(&'static str),
}

/// A fully attributed log, as surfaced in user-operation receipts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLog {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics, topic0 first.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
    /// Containing block hash.
    pub block_hash: B256,
    /// Containing block number.
    pub block_number: u64,
    /// Emitting transaction.
    pub transaction_hash: TxHash,
    /// Transaction index within the block.
    pub transaction_index: u64,
    /// Log index within the block.
    pub log_index: u64,
}

impl TryFrom<&Log> for ReceiptLog {
    type Error = ReceiptSchemaError;

    fn try_from(log: &Log) -> Result<Self, Self::Error> {
        Ok(Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_hash: log
                .block_hash
                .ok_or(ReceiptSchemaError::MissingLogField("blockHash"))?,
            block_number: log
                .block_number
                .ok_or(ReceiptSchemaError::MissingLogField("blockNumber"))?,
            transaction_hash: log
                .transaction_hash
                .ok_or(ReceiptSchemaError::MissingLogField("transactionHash"))?,
            transaction_index: log
                .transaction_index
                .ok_or(ReceiptSchemaError::MissingLogField("transactionIndex"))?,
            log_index: log
                .log_index
                .ok_or(ReceiptSchemaError::MissingLogField("logIndex"))?,
        })
    }
}

/// Receipt of the bundle transaction that carried the op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTransactionReceipt {
    /// Hash of the bundle transaction.
    pub transaction_hash: TxHash,
    /// Index within the block.
    pub transaction_index: u64,
    /// Containing block hash.
    pub block_hash: B256,
    /// Containing block number.
    pub block_number: u64,
    /// The executor wallet that sent the bundle.
    pub from: Address,
    /// The entry point.
    pub to: Option<Address>,
    /// Running gas total for the block.
    pub cumulative_gas_used: u128,
    /// Gas used by the bundle transaction.
    pub gas_used: u128,
    /// Price actually paid per gas unit.
    pub effective_gas_price: u128,
    /// Deployed contract, for creation transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    /// `1` on success, `0` otherwise.
    pub status: u8,
    /// Bloom filter over the logs.
    pub logs_bloom: Bloom,
    /// Every log of the bundle transaction.
    pub logs: Vec<ReceiptLog>,
}

impl TryFrom<&TransactionReceiptData> for BundleTransactionReceipt {
    type Error = ReceiptSchemaError;

    fn try_from(receipt: &TransactionReceiptData) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            transaction_index: receipt
                .transaction_index
                .ok_or(ReceiptSchemaError::MissingReceiptField("transactionIndex"))?,
            block_hash: receipt
                .block_hash
                .ok_or(ReceiptSchemaError::MissingReceiptField("blockHash"))?,
            block_number: receipt
                .block_number
                .ok_or(ReceiptSchemaError::MissingReceiptField("blockNumber"))?,
            from: receipt.from,
            to: receipt.to,
            cumulative_gas_used: receipt.cumulative_gas_used,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt
                .effective_gas_price
                .ok_or(ReceiptSchemaError::MissingReceiptField("effectiveGasPrice"))?,
            contract_address: receipt.contract_address,
            status: u8::from(receipt.success),
            logs_bloom: receipt.logs_bloom,
            logs: receipt
                .logs
                .iter()
                .map(ReceiptLog::try_from)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

/// A synthetic receipt for a single user operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    /// Hash of the operation.
    pub user_op_hash: B256,
    /// The entry point that executed it.
    pub entry_point: Address,
    /// The smart account that sent it.
    pub sender: Address,
    /// The op's nonce.
    pub nonce: U256,
    /// Sponsoring paymaster; absent when the op was self-funded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    /// Gas actually consumed by the op.
    pub actual_gas_used: U256,
    /// Wei actually charged for the op.
    pub actual_gas_cost: U256,
    /// Whether the op's execution phase succeeded.
    pub success: bool,
    /// Raw execution revert payload, when the op reverted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Bytes>,
    /// Logs emitted by this op's execution, in block order.
    pub logs: Vec<ReceiptLog>,
    /// Receipt of the whole bundle transaction.
    pub receipt: BundleTransactionReceipt,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, B256};

    fn raw_log() -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xee),
                data: LogData::new_unchecked(vec![B256::repeat_byte(1)], Bytes::from_static(&[1])),
            },
            block_hash: Some(B256::repeat_byte(2)),
            block_number: Some(7),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(3)),
            transaction_index: Some(4),
            log_index: Some(5),
            removed: false,
        }
    }

    #[test]
    fn log_conversion_requires_topology() {
        assert!(ReceiptLog::try_from(&raw_log()).is_ok());

        let mut missing = raw_log();
        missing.log_index = None;
        assert_eq!(
            ReceiptLog::try_from(&missing),
            Err(ReceiptSchemaError::MissingLogField("logIndex")),
        );
    }

    #[test]
    fn receipt_status_serializes_as_integer() {
        let receipt = BundleTransactionReceipt {
            transaction_hash: B256::repeat_byte(3),
            transaction_index: 4,
            block_hash: B256::repeat_byte(2),
            block_number: 7,
            from: Address::repeat_byte(0xaa),
            to: Some(Address::repeat_byte(0xee)),
            cumulative_gas_used: 100_000,
            gas_used: 90_000,
            effective_gas_price: 12,
            contract_address: None,
            status: 1,
            logs_bloom: Bloom::default(),
            logs: Vec::new(),
        };

        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["status"], serde_json::json!(1));
        assert!(value.get("contractAddress").is_none());
        assert_eq!(value["transactionIndex"], serde_json::json!(4));
    }
}
