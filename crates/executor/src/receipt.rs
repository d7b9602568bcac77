//! Receipt reconstruction: rebuilding a per-op receipt from the logs of the
//! bundle transaction that carried it.

use crate::{error::ExecutorManagerError, manager::ExecutorManager};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, TxHash, B256},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use bundler_types::{
    BundleTransactionReceipt, ChainClientError, ReceiptLog, TransactionReceiptData,
    UserOperationEvent, UserOperationReceipt, UserOperationRevertReason,
};
use tracing::debug;

impl ExecutorManager {
    /// Rebuild the receipt for `user_op_hash` from chain state.
    ///
    /// Returns `None` while the op is not (yet) visibly mined: no matching
    /// `UserOperationEvent`, an event without a transaction hash, or receipt
    /// logs with incomplete topology. A mined event whose receipt carries no
    /// `UserOperationEvent` at all is an invariant violation and fails.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<UserOperationReceipt>, ExecutorManagerError> {
        let mut filter = Filter::new()
            .address(self.inner.config.entry_points.clone())
            .event_signature(UserOperationEvent::SIGNATURE_HASH)
            .topic1(user_op_hash);
        if let Some(range) = self.inner.config.rpc_max_block_range {
            let latest = self.inner.chain.get_block_number().await?;
            filter = filter
                .from_block(latest.saturating_sub(range))
                .to_block(BlockNumberOrTag::Latest);
        }

        let matches = self.inner.chain.get_logs(&filter).await?;
        let Some(event_log) = matches.first() else {
            return Ok(None);
        };
        // every decoded field must be present; a partial event is fatal
        let event = event_log.log_decode::<UserOperationEvent>()?.inner.data;

        let Some(transaction_hash) = event_log.transaction_hash else {
            // matched but not attributed to a transaction yet
            return Ok(None);
        };

        let mut receipt = self.fetch_receipt(transaction_hash).await?;
        if receipt.effective_gas_price.is_none() {
            receipt.effective_gas_price = self
                .inner
                .chain
                .get_transaction(transaction_hash)
                .await?
                .and_then(|transaction| transaction.gas_price);
        }

        // a log without full topology means the transaction is still settling
        if receipt.logs.iter().any(|log| !has_full_topology(log)) {
            return Ok(None);
        }

        let mut start_index = None;
        let mut op_event: Option<(usize, Address)> = None;
        let mut revert_reason = None;
        for (index, log) in receipt.logs.iter().enumerate() {
            let topics = log.inner.data.topics();
            let Some(topic0) = topics.first() else { continue };
            if *topic0 == UserOperationEvent::SIGNATURE_HASH {
                if topics.get(1) == Some(&user_op_hash) {
                    op_event = Some((index, log.inner.address));
                } else if op_event.is_none() {
                    // closest preceding op boundary
                    start_index = Some(index);
                }
            } else if *topic0 == UserOperationRevertReason::SIGNATURE_HASH
                && topics.get(1) == Some(&user_op_hash)
            {
                let decoded = log.log_decode::<UserOperationRevertReason>()?.inner.data;
                revert_reason = Some(decoded.revertReason);
            }
        }
        let Some((end_index, entry_point)) = op_event else {
            return Err(ExecutorManagerError::MissingUserOperationEvent(user_op_hash));
        };

        // the op's own logs sit strictly between the previous op's event and
        // its own
        let first = start_index.map_or(0, |index| index + 1);
        let logs = receipt.logs[first..end_index]
            .iter()
            .map(ReceiptLog::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let bundle_receipt = BundleTransactionReceipt::try_from(&receipt)?;

        let paymaster = (event.paymaster != Address::ZERO).then_some(event.paymaster);

        Ok(Some(UserOperationReceipt {
            user_op_hash,
            entry_point,
            sender: event.sender,
            nonce: event.nonce,
            paymaster,
            actual_gas_used: event.actualGasUsed,
            actual_gas_cost: event.actualGasCost,
            success: event.success,
            reason: revert_reason,
            logs,
            receipt: bundle_receipt,
        }))
    }

    /// Fetch the receipt, retrying for as long as the node reports it
    /// missing. Any other error propagates.
    async fn fetch_receipt(
        &self,
        transaction_hash: TxHash,
    ) -> Result<TransactionReceiptData, ExecutorManagerError> {
        loop {
            match self.inner.chain.get_transaction_receipt(transaction_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(ChainClientError::ReceiptNotFound(_)) => {
                    debug!(
                        target: "executor::receipt",
                        tx = %transaction_hash,
                        "receipt not available yet, retrying",
                    );
                    tokio::time::sleep(self.inner.config.polling_interval).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn has_full_topology(log: &Log) -> bool {
    log.block_hash.is_some()
        && log.block_number.is_some()
        && log.transaction_hash.is_some()
        && log.transaction_index.is_some()
        && log.log_index.is_some()
        && !log.inner.data.topics().is_empty()
}
