//! Status resolution tests: inclusion, AA95 resubmission, AA25 frontrun
//! detection, and generic on-chain failure.

use super::*;
use alloy::primitives::B256;
use bundler_types::{
    BundleStatus, OperationStatus, ReplaceResult, UserOperationDetails,
    UserOperationExecutionStatus,
};
use mockall::predicate::eq;
use std::collections::HashMap;

fn included_details(
    op_hash: B256,
    status: UserOperationExecutionStatus,
    account_deployed: bool,
) -> BundleStatus {
    let mut user_operation_details = HashMap::new();
    user_operation_details.insert(
        op_hash,
        UserOperationDetails { status, account_deployed, revert_reason: None },
    );
    BundleStatus::Included { user_operation_details }
}

#[tokio::test]
async fn included_op_reaches_terminal_state() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;
    let tx = tx_info(0xaa, vec![op.clone()]);
    let tx_hash = tx.transaction_hash;

    mocks.chain.expect_get_bundle_status().times(1).returning(move |_, _| {
        Ok(included_details(op_hash, UserOperationExecutionStatus::Succesful, true))
    });
    mocks.mempool.expect_remove_submitted().with(eq(op_hash)).times(1).returning(|_| Ok(()));
    mocks
        .reputation
        .expect_update_user_operation_included_status()
        .withf(move |op, ep, account_deployed| {
            op.hash == op_hash && *ep == entry_point() && *account_deployed
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    mocks
        .events
        .expect_emit_included_on_chain()
        .with(eq(op_hash), eq(tx_hash))
        .times(1)
        .returning(|_, _| ());
    mocks
        .monitor
        .expect_set_user_operation_status()
        .with(eq(op_hash), eq(OperationStatus::Included), eq(Some(tx_hash)))
        .times(1)
        .return_const(());
    mocks
        .executor
        .expect_mark_wallet_processed()
        .with(eq(executor_wallet()))
        .times(1)
        .returning(|_| Ok(()));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["included"]).get(), 1);
    assert_eq!(metrics.user_operation_inclusion_duration.get_sample_count(), 1);
}

#[tokio::test]
async fn execution_reverted_op_still_counts_as_included() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;
    let tx = tx_info(0xaa, vec![op.clone()]);
    let tx_hash = tx.transaction_hash;

    mocks.chain.expect_get_bundle_status().times(1).returning(move |_, _| {
        Ok(included_details(op_hash, UserOperationExecutionStatus::Reverted, false))
    });
    mocks.mempool.expect_remove_submitted().times(1).returning(|_| Ok(()));
    mocks
        .reputation
        .expect_update_user_operation_included_status()
        .withf(|_, _, account_deployed| !*account_deployed)
        .times(1)
        .returning(|_, _, _| Ok(()));
    mocks
        .events
        .expect_emit_execution_reverted_on_chain()
        .withf(move |hash, tx, _| *hash == op_hash && *tx == tx_hash)
        .times(1)
        .returning(|_, _, _| ());
    mocks
        .monitor
        .expect_set_user_operation_status()
        .with(eq(op_hash), eq(OperationStatus::Included), eq(Some(tx_hash)))
        .times(1)
        .return_const(());
    mocks.executor.expect_mark_wallet_processed().times(1).returning(|_| Ok(()));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["included"]).get(), 1);
}

#[tokio::test]
async fn included_candidate_wins_over_reverted_candidate() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;

    // the current broadcast reverted, but an earlier replaced broadcast
    // landed
    let original = tx_info(0xaa, vec![op.clone()]);
    let current = Arc::new(bundler_types::TransactionInfo::replacing(
        &original,
        B256::repeat_byte(0xab),
        request(1_000_000, 1, 12, 2),
        vec![op.clone()],
    ));
    let landed_hash = original.transaction_hash;

    mocks.chain.expect_get_bundle_status().times(2).returning(move |_, hash| {
        if hash == landed_hash {
            Ok(included_details(op_hash, UserOperationExecutionStatus::Succesful, false))
        } else {
            Ok(BundleStatus::Reverted { is_aa95: false, reason: Some("reverted".into()) })
        }
    });
    mocks.mempool.expect_remove_submitted().times(1).returning(|_| Ok(()));
    mocks
        .reputation
        .expect_update_user_operation_included_status()
        .times(1)
        .returning(|_, _, _| Ok(()));
    mocks
        .events
        .expect_emit_included_on_chain()
        .with(eq(op_hash), eq(landed_hash))
        .times(1)
        .returning(|_, _| ());
    mocks
        .monitor
        .expect_set_user_operation_status()
        .with(eq(op_hash), eq(OperationStatus::Included), eq(Some(landed_hash)))
        .times(1)
        .return_const(());
    mocks.executor.expect_mark_wallet_processed().times(1).returning(|_| Ok(()));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), current).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["included"]).get(), 1);
    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["reverted"]).get(), 0);
}

#[tokio::test]
async fn aa95_revert_bumps_gas_and_nonce_before_replacing() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;
    let tx = Arc::new(bundler_types::TransactionInfo::new(
        B256::repeat_byte(0xaa),
        request(1000, 7, 10, 1),
        vec![op.clone()],
        executor_wallet(),
        true,
    ));

    mocks.chain.expect_get_bundle_status().times(1).returning(|_, _| {
        Ok(BundleStatus::Reverted { is_aa95: true, reason: Some("AA95 out of gas".into()) })
    });

    let mut seq = mockall::Sequence::new();
    mocks
        .mempool
        .expect_remove_submitted()
        .with(eq(op_hash))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    let replacement = tx_info(0xab, vec![op.clone()]);
    mocks
        .executor
        .expect_replace_transaction()
        .withf(|info| {
            // the mutation must be visible to the executor
            let request = info.transaction_request.lock();
            request.gas == 1250 && request.nonce == 8
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(move |_| {
            Ok(ReplaceResult::Replaced { transaction_info: Arc::clone(&replacement) })
        });
    mocks.mempool.expect_replace_submitted().times(1).returning(|_, _| Ok(()));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["reverted"]).get(), 1);
    assert_eq!(metrics.replaced_transactions.with_label_values(&["AA95", "replaced"]).get(), 1);
}

#[tokio::test(start_paused = true)]
async fn aa25_revert_without_receipt_marks_the_op_rejected() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;
    let tx = tx_info(0xaa, vec![op.clone()]);
    let reverted_hash = tx.transaction_hash;

    // two consecutive blocks resolve the same AA25 revert; only one watcher
    // may spawn
    mocks.chain.expect_get_bundle_status().times(2).returning(|_, _| {
        Ok(BundleStatus::Reverted {
            is_aa95: false,
            reason: Some("AA25 invalid account nonce".into()),
        })
    });
    mocks.chain.expect_get_block_number().times(1).returning(|| Ok(10));

    let (block_tx, block_rx) = tokio::sync::mpsc::unbounded_channel();
    mocks
        .chain
        .expect_watch_block_number()
        .times(1)
        .return_once(move |_| Ok(channelled_block_numbers(block_rx)));

    // two blocks later there is still no receipt for the op
    mocks.chain.expect_get_logs().times(1).returning(|_| Ok(vec![]));

    mocks.mempool.expect_remove_submitted().with(eq(op_hash)).times(1).returning(|_| Ok(()));
    mocks
        .monitor
        .expect_set_user_operation_status()
        .with(eq(op_hash), eq(OperationStatus::Rejected), eq(None))
        .times(1)
        .return_const(());
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    mocks
        .events
        .expect_emit_failed_on_chain()
        .with(eq(op_hash), eq(reverted_hash))
        .times(1)
        .returning(move |_, _| {
            done_tx.send(()).unwrap();
        });

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), Arc::clone(&tx)).await.unwrap();
    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();
    assert_eq!(manager.inner.frontrun_watchers.lock().len(), 1);

    // anchor + 1 gives the chain slack; nothing may resolve yet
    block_tx.send(11).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.inner.frontrun_watchers.lock().len(), 1);

    block_tx.send(12).unwrap();
    tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap().unwrap();

    // the watcher fires exactly once and deregisters itself
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.inner.frontrun_watchers.lock().is_empty());
    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["reverted"]).get(), 2);
}

#[tokio::test(start_paused = true)]
async fn aa25_revert_with_receipt_marks_the_op_frontran() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let op_hash = op.hash;
    let tx = tx_info(0xaa, vec![op.clone()]);

    mocks.chain.expect_get_bundle_status().times(1).returning(|_, _| {
        Ok(BundleStatus::Reverted {
            is_aa95: false,
            reason: Some("FailedOp(0, \"AA25 invalid account nonce\")".into()),
        })
    });
    mocks.chain.expect_get_block_number().times(1).returning(|| Ok(10));
    mocks
        .chain
        .expect_watch_block_number()
        .times(1)
        .return_once(|_| Ok(block_number_stream(vec![12])));

    // a competing bundler's transaction carried the op
    let event_log = user_op_event_log(op_hash, Address::ZERO, true, 0);
    let logs = vec![event_log.clone()];
    mocks.chain.expect_get_logs().times(1).returning(move |_| Ok(logs.clone()));
    let receipt = receipt_data(vec![event_log]);
    mocks
        .chain
        .expect_get_transaction_receipt()
        .times(1)
        .returning(move |_| Ok(receipt.clone()));

    mocks.mempool.expect_remove_submitted().with(eq(op_hash)).times(1).returning(|_| Ok(()));
    mocks
        .monitor
        .expect_set_user_operation_status()
        .with(eq(op_hash), eq(OperationStatus::Included), eq(Some(bundle_tx_hash())))
        .times(1)
        .return_const(());
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    mocks
        .events
        .expect_emit_frontran_on_chain()
        .with(eq(op_hash), eq(bundle_tx_hash()))
        .times(1)
        .returning(move |_, _| {
            done_tx.send(()).unwrap();
        });

    let manager = manager(test_config(), mocks, ExecutorMetrics::default());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn generic_revert_rejects_every_op() {
    let mut mocks = Mocks::new();
    let first = op_info(0x01);
    let second = op_info(0x02);
    let tx = tx_info(0xaa, vec![first.clone(), second.clone()]);
    let tx_hash = tx.transaction_hash;

    mocks.chain.expect_get_bundle_status().times(1).returning(|_, _| {
        Ok(BundleStatus::Reverted { is_aa95: false, reason: None })
    });
    mocks.mempool.expect_remove_submitted().times(2).returning(|_| Ok(()));
    mocks
        .monitor
        .expect_set_user_operation_status()
        .withf(move |_, status, tx| {
            *status == OperationStatus::Rejected && *tx == Some(tx_hash)
        })
        .times(2)
        .return_const(());
    mocks.events.expect_emit_failed_on_chain().times(2).returning(|_, _| ());
    mocks
        .executor
        .expect_mark_wallet_processed()
        .with(eq(executor_wallet()))
        .times(1)
        .returning(|_| Ok(()));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["reverted"]).get(), 2);
}

#[tokio::test]
async fn pending_transaction_is_left_alone() {
    let mut mocks = Mocks::new();
    let op = op_info(0x01);
    let tx = tx_info(0xaa, vec![op]);

    mocks.chain.expect_get_bundle_status().times(1).returning(|_, _| Ok(BundleStatus::NotFound));

    let metrics = ExecutorMetrics::default();
    let manager = manager(test_config(), mocks, metrics.clone());

    manager.refresh_transaction_status(entry_point(), tx).await.unwrap();

    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["included"]).get(), 0);
    assert_eq!(metrics.user_operations_on_chain.with_label_values(&["reverted"]).get(), 0);
}
