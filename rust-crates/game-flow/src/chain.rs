use std::future::Future;

use coinflip_abi::GameCreatedFilter;
use ethers::types::{
    Address,
    Log,
    TxHash,
    U256,
};

use crate::{
    error::ChainError,
    subscription::ResolutionSubscription,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub logs: Vec<Log>,
}

/// Ledger capabilities the game flow needs. Implementations own transport,
/// signing and polling; the flow only sequences calls and interprets results.
pub trait ChainClient: Send + Sync + 'static {
    /// Account that signs and pays for games.
    fn player(&self) -> Address;

    /// Coinflip contract games are placed against.
    fn contract(&self) -> Address;

    fn submit_game_start(
        &self,
        bet: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn await_confirmation(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Confirmation, ChainError>> + Send;

    /// Opens a stream of `GameResolved` batches emitted by [`Self::contract`] at or
    /// after `from_block`. Batches are not filtered by nonce.
    fn subscribe_resolutions(
        &self,
        from_block: u64,
    ) -> impl Future<Output = Result<ResolutionSubscription, ChainError>> + Send;

    fn read_balance(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;

    fn decode_creations(&self, logs: &[Log]) -> Result<Vec<GameCreatedFilter>, ChainError> {
        coinflip_abi::decode_logs::<GameCreatedFilter>(logs, self.contract())
            .map_err(ChainError::from)
    }
}
