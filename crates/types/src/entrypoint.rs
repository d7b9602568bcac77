//! Entry-point events the executor decodes from chain logs.

use alloy::sol;

sol! {
    /// Emitted by the entry point after each executed user operation.
    ///
    /// Marks the end of the op's log slice within a bundle transaction.
    #[derive(Debug, PartialEq, Eq)]
    event UserOperationEvent(
        bytes32 indexed userOpHash,
        address indexed sender,
        address indexed paymaster,
        uint256 nonce,
        bool success,
        uint256 actualGasCost,
        uint256 actualGasUsed
    );

    /// Emitted when the op's execution phase reverted.
    #[derive(Debug, PartialEq, Eq)]
    event UserOperationRevertReason(
        bytes32 indexed userOpHash,
        address indexed sender,
        uint256 nonce,
        bytes revertReason
    );
}
