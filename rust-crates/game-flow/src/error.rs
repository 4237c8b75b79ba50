use std::time::Duration;

use ethers::types::{
    TxHash,
    U256,
};

use crate::affordability::Unaffordable;

/// Failures reported by a [`ChainClient`](crate::chain::ChainClient).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("transaction {0:?} reverted")]
    Reverted(TxHash),
    #[error("transaction {0:?} was dropped before confirmation")]
    Dropped(TxHash),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not decode logs: {0}")]
    Decode(String),
    #[error("rpc error: {0}")]
    Transport(String),
}

impl From<coinflip_abi::AbiError> for ChainError {
    fn from(err: coinflip_abi::AbiError) -> Self {
        ChainError::Decode(err.to_string())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("bet amount must be greater than zero")]
    ZeroBet,
    #[error("cannot start: {0}")]
    Precondition(#[from] Unaffordable),
    #[error("could not read balances: {0}")]
    BalanceUnavailable(ChainError),
    #[error("game flow is {0}")]
    FlowInProgress(&'static str),
    #[error("submission failed: {0}")]
    Submission(ChainError),
    #[error("confirmation failed: {0}")]
    Confirmation(ChainError),
    #[error("creation event missing from transaction {0:?}")]
    ProtocolMismatch(TxHash),
    #[error("log decoding failed: {0}")]
    Decode(ChainError),
    #[error("could not subscribe to resolutions: {0}")]
    Subscription(ChainError),
    #[error("resolution stream closed before game {0} resolved")]
    StreamClosed(U256),
    #[error("no resolution within {0:?}")]
    ResolutionTimedOut(Duration),
    #[error("game cancelled")]
    Cancelled,
}

impl FlowError {
    /// Errors raised before anything reached the chain.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            FlowError::ZeroBet
                | FlowError::Precondition(_)
                | FlowError::BalanceUnavailable(_)
                | FlowError::FlowInProgress(_)
        )
    }
}
