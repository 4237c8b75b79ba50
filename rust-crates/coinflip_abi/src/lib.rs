use std::sync::Arc;

use ethers::{
    abi::RawLog,
    contract::{
        ContractRevert,
        EthEvent,
    },
    providers::Middleware,
    types::{
        Address,
        Log,
    },
};

pub mod coinflip_types {
    use ethers::contract::abigen;

    abigen!(Coinflip, "./abi/Coinflip.json");
}

pub use coinflip_types::{
    Coinflip,
    CoinflipErrors,
    GameCreatedFilter,
    GameResolvedFilter,
    InsufficientBalance,
    MinBetNotMet,
    WithdrawalFilter,
};

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

/// Raw ABI JSON the bindings above are generated from.
pub const COINFLIP_ABI: &str = include_str!("../abi/Coinflip.json");

/// Coinflip contract deployed on Arbitrum Sepolia.
pub const ARBITRUM_SEPOLIA_COINFLIP_ADDRESS: &str =
    "0xc5f7e2e3ea007ff00796cde95f54b27d114ac33e";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid contract address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to decode {event} log: {reason}")]
    Decode { event: String, reason: String },
}

pub fn parse_address(address: &str) -> Result<Address, AbiError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|err| AbiError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        })
}

pub fn contract_instance<M: Middleware>(address: Address, client: Arc<M>) -> Coinflip<M> {
    Coinflip::new(address, client)
}

/// Decodes `log` as event `E` if it was emitted by `contract` and carries `E`'s
/// signature. Foreign logs yield `Ok(None)`.
pub fn decode_log<E: EthEvent>(log: &Log, contract: Address) -> Result<Option<E>, AbiError> {
    if log.address != contract {
        return Ok(None);
    }
    match log.topics.first() {
        Some(topic) if *topic == E::signature() => {}
        _ => return Ok(None),
    }

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    E::decode_log(&raw)
        .map(Some)
        .map_err(|err| AbiError::Decode {
            event: E::name().into_owned(),
            reason: err.to_string(),
        })
}

pub fn decode_logs<E: EthEvent>(logs: &[Log], contract: Address) -> Result<Vec<E>, AbiError> {
    let mut events = Vec::new();
    for log in logs {
        if let Some(event) = decode_log::<E>(log, contract)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Decodes revert data (selector followed by arguments) into one of the
/// contract's custom errors.
pub fn decode_revert(data: &[u8]) -> Option<CoinflipErrors> {
    <CoinflipErrors as ContractRevert>::decode_with_selector(data)
}

/// Human readable reason for a custom error revert.
pub fn describe_revert(revert: &CoinflipErrors) -> String {
    match revert {
        CoinflipErrors::MinBetNotMet(MinBetNotMet { min_bet, player_bet }) => {
            format!("bet of {player_bet} wei is below the minimum bet of {min_bet} wei")
        }
        CoinflipErrors::InsufficientBalance(InsufficientBalance {
            available,
            requested,
        }) => format!("contract holds {available} wei, {requested} wei requested"),
        CoinflipErrors::RevertString(reason) => reason.clone(),
        other => format!("contract reverted with {other:?}"),
    }
}
