use ethers::{
    abi::{
        Token,
        encode,
    },
    contract::EthEvent,
    types::{
        Address,
        Bytes,
        H256,
        Log,
        TxHash,
        U256,
    },
};

use crate::{
    GameCreatedFilter,
    GameResolvedFilter,
    WithdrawalFilter,
};

fn uint_topic(value: U256) -> H256 {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    H256::from(word)
}

fn address_topic(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256::from(word)
}

pub fn game_created_log(
    contract: Address,
    tx_hash: TxHash,
    nonce: U256,
    player: Address,
    bet: U256,
) -> Log {
    Log {
        address: contract,
        topics: vec![
            GameCreatedFilter::signature(),
            uint_topic(nonce),
            address_topic(player),
        ],
        data: Bytes::from(encode(&[Token::Uint(bet)])),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

pub fn game_resolved_log(
    contract: Address,
    nonce: U256,
    player: Address,
    bet: U256,
    won: bool,
) -> Log {
    Log {
        address: contract,
        topics: vec![
            GameResolvedFilter::signature(),
            uint_topic(nonce),
            address_topic(player),
        ],
        data: Bytes::from(encode(&[Token::Uint(bet), Token::Bool(won)])),
        ..Default::default()
    }
}

pub fn withdrawal_log(contract: Address, to: Address, amount: U256) -> Log {
    Log {
        address: contract,
        topics: vec![WithdrawalFilter::signature(), address_topic(to)],
        data: Bytes::from(encode(&[Token::Uint(amount)])),
        ..Default::default()
    }
}

/// Same topics as `log` with the data section stripped, so it no longer decodes.
pub fn truncated_log(log: &Log) -> Log {
    Log {
        data: Bytes::default(),
        ..log.clone()
    }
}

pub fn resolved_event(
    nonce: u64,
    player: Address,
    bet: U256,
    won: bool,
) -> GameResolvedFilter {
    GameResolvedFilter {
        nonce: U256::from(nonce),
        player,
        bet,
        won,
    }
}
