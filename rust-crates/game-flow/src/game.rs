use std::{
    fmt,
    str::FromStr,
};

use chrono::{
    DateTime,
    Utc,
};
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use serde::{
    Serialize,
    Serializer,
};

use crate::{
    error::FlowError,
    status::StatusStep,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn other(self) -> Self {
        match self {
            CoinSide::Heads => CoinSide::Tails,
            CoinSide::Tails => CoinSide::Heads,
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => f.write_str("heads"),
            CoinSide::Tails => f.write_str("tails"),
        }
    }
}

impl FromStr for CoinSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heads" | "h" => Ok(CoinSide::Heads),
            "tails" | "t" => Ok(CoinSide::Tails),
            other => Err(format!("unknown coin side '{other}', expected heads or tails")),
        }
    }
}

/// Result shown to the player. The contract only reports win or loss relative to
/// the chosen side, so the face is reconstructed from that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub side: CoinSide,
    pub won: bool,
}

impl Outcome {
    pub fn derive(chosen: CoinSide, won: bool) -> Self {
        let side = if won { chosen } else { chosen.other() };
        Self { side, won }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Game {
    pub player: Address,
    pub bet: U256,
    pub chosen_side: CoinSide,
    pub tx_hash: Option<TxHash>,
    pub nonce: Option<U256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum GameStatus {
    Idle,
    AwaitingConfirmation,
    AwaitingResolution { nonce: U256 },
    Resolved(Outcome),
    Failed(#[serde(serialize_with = "display_string")] FlowError),
    Cancelled,
}

fn display_string<S: Serializer>(err: &FlowError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GameStatus::Resolved(_) | GameStatus::Failed(_) | GameStatus::Cancelled
        )
    }

    /// A game has been submitted and has not reached a terminal state.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            GameStatus::AwaitingConfirmation | GameStatus::AwaitingResolution { .. }
        )
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            GameStatus::Resolved(outcome) => Some(*outcome),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GameStatus::Idle => "idle",
            GameStatus::AwaitingConfirmation => "awaiting confirmation",
            GameStatus::AwaitingResolution { .. } => "awaiting resolution",
            GameStatus::Resolved(_) => "resolved",
            GameStatus::Failed(_) => "failed",
            GameStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub player: U256,
    pub house: U256,
    pub read_at: DateTime<Utc>,
}

/// Read-only view handed to the presentation layer after every transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowSnapshot {
    pub status: GameStatus,
    pub game: Option<Game>,
    pub steps: Vec<StatusStep>,
    pub balances: Option<Balances>,
}

impl FlowSnapshot {
    pub fn idle() -> Self {
        Self {
            status: GameStatus::Idle,
            game: None,
            steps: Vec::new(),
            balances: None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.status.outcome()
    }
}
