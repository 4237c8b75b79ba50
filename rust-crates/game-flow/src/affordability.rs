//! Pre-submission gate comparing a wager against both sides of the table.

use ethers::types::{
    U256,
    U512,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Payout factor applied to a winning bet, kept as an exact fraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutMultiplier {
    pub numerator: u64,
    pub denominator: u64,
}

impl PayoutMultiplier {
    /// 1.9x: the winner gets the stake back plus a 90% premium.
    pub const STANDARD: Self = Self {
        numerator: 19,
        denominator: 10,
    };

    /// Amount paid out on a win rounded up to whole wei, `None` on overflow or
    /// a zero denominator.
    pub fn payout_for(&self, bet: U256) -> Option<U256> {
        if self.denominator == 0 {
            return None;
        }
        let denominator = U256::from(self.denominator);
        bet.checked_mul(U256::from(self.numerator))?
            .checked_add(denominator - 1)
            .map(|scaled| scaled / denominator)
    }

    /// Whether `reserve` covers `bet * numerator / denominator` exactly,
    /// without rounding.
    pub fn covered_by(&self, reserve: U256, bet: U256) -> bool {
        reserve.full_mul(U256::from(self.denominator)) >= bet.full_mul(U256::from(self.numerator))
    }

    /// Largest bet whose payout `house_balance` still covers.
    pub fn max_covered_bet(&self, house_balance: U256) -> U256 {
        if self.numerator == 0 {
            return U256::MAX;
        }
        let scaled = house_balance.full_mul(U256::from(self.denominator));
        U256::try_from(scaled / U512::from(self.numerator)).unwrap_or(U256::MAX)
    }
}

impl Default for PayoutMultiplier {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Unaffordable {
    #[error("balance of {balance} wei does not cover the bet of {bet} wei")]
    Player { balance: U256, bet: U256 },
    #[error("house reserve of {reserve} wei cannot cover a payout of {payout} wei")]
    House { reserve: U256, payout: U256 },
}

pub fn can_afford(user_balance: U256, bet: U256) -> bool {
    user_balance >= bet
}

pub fn can_payout(house_balance: U256, bet: U256, multiplier: PayoutMultiplier) -> bool {
    multiplier.covered_by(house_balance, bet)
}

/// Both checks in order, reporting the first one that fails.
pub fn check(
    user_balance: U256,
    house_balance: U256,
    bet: U256,
    multiplier: PayoutMultiplier,
) -> Result<(), Unaffordable> {
    if !can_afford(user_balance, bet) {
        return Err(Unaffordable::Player {
            balance: user_balance,
            bet,
        });
    }
    if !can_payout(house_balance, bet, multiplier) {
        return Err(Unaffordable::House {
            reserve: house_balance,
            payout: multiplier.payout_for(bet).unwrap_or(U256::MAX),
        });
    }
    Ok(())
}
