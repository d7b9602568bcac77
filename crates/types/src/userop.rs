//! User operation payloads and the bookkeeping the executor attaches to them.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// An ERC-4337 v0.6 user operation.
///
/// The executor never interprets these fields. The payload is carried through
/// bundling, handed to the low-level executor, and surfaced verbatim in
/// events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// The smart account sending the operation.
    pub sender: Address,
    /// Account-scoped anti-replay nonce.
    pub nonce: U256,
    /// Factory call deploying the account, empty if already deployed.
    pub init_code: Bytes,
    /// The call the account executes.
    pub call_data: Bytes,
    /// Gas allotted to the execution phase.
    pub call_gas_limit: U256,
    /// Gas allotted to the validation phase.
    pub verification_gas_limit: U256,
    /// Gas paid up front for calldata and bundle overhead.
    pub pre_verification_gas: U256,
    /// EIP-1559 fee cap.
    pub max_fee_per_gas: U256,
    /// EIP-1559 priority fee.
    pub max_priority_fee_per_gas: U256,
    /// Paymaster address and payload, empty when self-funded.
    pub paymaster_and_data: Bytes,
    /// Account signature over the operation.
    pub signature: Bytes,
}

/// A user operation as tracked by the mempool and the executor manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationInfo {
    /// The signed payload.
    pub user_operation: UserOperation,
    /// The operation's canonical hash.
    pub hash: B256,
    /// The entry point the operation targets.
    pub entry_point: Address,
    /// Unix-ms timestamp of the first submission attempt.
    pub first_submitted: u64,
    /// Whether the payload travels through the compressed bundling path.
    pub is_compressed: bool,
}

/// Extract the `AAxx` code from a free-form rejection reason, if one is
/// present.
///
/// Entry points embed these codes in revert strings (`"AA25 invalid account
/// nonce"`); dropped-operation events carry the code so downstream consumers
/// can classify rejections without string matching.
pub fn aa_error_code(reason: &str) -> Option<&str> {
    let bytes = reason.as_bytes();
    bytes.windows(4).position(|window| {
        window[0] == b'A'
            && window[1] == b'A'
            && window[2].is_ascii_digit()
            && window[3].is_ascii_digit()
    })
    .map(|start| &reason[start..start + 4])
}
