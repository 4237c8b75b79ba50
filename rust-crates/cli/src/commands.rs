use std::sync::Arc;

use chrono::Local;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    compute_abi_hash,
    record_deployment,
};
use ethers::{
    providers::{
        Http,
        Middleware,
        Provider,
    },
    types::{
        Address,
        U256,
    },
    utils::format_ether,
};
use game_flow::{
    ChainClient,
    CoinSide,
    FlowConfig,
    FlowError,
    FlowSnapshot,
    GameFlow,
    Outcome,
    StatusStep,
    affordability::PayoutMultiplier,
};
use tracing::{
    info,
    warn,
};

use crate::chain::EvmChain;

/// `0.050000000000000000` -> `0.05`
pub fn format_eth(amount: U256) -> String {
    let formatted = format_ether(amount);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}

pub fn format_step(step: &StatusStep) -> String {
    let time = step.occurred_at.with_timezone(&Local).format("%H:%M:%S");
    format!("[{time}] {}", step.label())
}

pub fn describe_outcome(outcome: &Outcome, bet: U256, multiplier: PayoutMultiplier) -> String {
    if outcome.won {
        let payout = multiplier
            .payout_for(bet)
            .map(format_eth)
            .unwrap_or_else(|| "?".to_string());
        format!("Coin landed on {}. You won {payout} ETH!", outcome.side)
    } else {
        format!(
            "Coin landed on {}. You lost {} ETH.",
            outcome.side,
            format_eth(bet)
        )
    }
}

/// Prints steps of `snapshot` past `printed`, returning the new count. A
/// cancelled flow clears its steps, which resets the count.
fn print_new_steps(snapshot: &FlowSnapshot, printed: usize) -> usize {
    if snapshot.steps.len() < printed {
        return snapshot.steps.len();
    }
    for step in &snapshot.steps[printed..] {
        println!("{}", format_step(step));
    }
    snapshot.steps.len()
}

pub async fn flip(
    chain: Arc<EvmChain>,
    config: FlowConfig,
    bet: U256,
    side: CoinSide,
    json: bool,
) -> Result<()> {
    let multiplier = config.payout_multiplier;
    let potential = multiplier
        .payout_for(bet)
        .ok_or_else(|| eyre!("Bet of {bet} wei is too large"))?;
    println!(
        "Betting {} ETH on {side} (potential winnings {} ETH)",
        format_eth(bet),
        format_eth(potential)
    );

    let flow = Arc::new(GameFlow::new(chain, config));
    let mut updates = flow.subscribe();
    let mut game = tokio::spawn({
        let flow = flow.clone();
        async move { flow.start(bet, side).await }
    });

    let mut printed = 0;
    let result = loop {
        tokio::select! {
            joined = &mut game => break joined.wrap_err("Game task panicked")?,
            changed = updates.changed() => {
                if changed.is_ok() {
                    printed = print_new_steps(&updates.borrow_and_update(), printed);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("Failed to listen for ctrl-c")?;
                flow.cancel();
                println!("Cancelled. A bet that was already submitted still settles on-chain.");
                break Err(FlowError::Cancelled);
            }
        }
    };
    let snapshot = flow.snapshot();
    print_new_steps(&snapshot, printed);

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    match result {
        Ok(outcome) => {
            println!("{}", describe_outcome(&outcome, bet, multiplier));
            if let Some(balances) = snapshot.balances {
                println!(
                    "Balance {} ETH, house {} ETH",
                    format_eth(balances.player),
                    format_eth(balances.house)
                );
            }
            Ok(())
        }
        Err(FlowError::Cancelled) => Ok(()),
        Err(err) => Err(err).wrap_err("Coin flip failed"),
    }
}

pub async fn balance(chain: &EvmChain, multiplier: PayoutMultiplier) -> Result<()> {
    let player = chain.read_balance(chain.player()).await?;
    let house = chain.read_balance(chain.contract()).await?;
    println!("Chain id {}", chain.chain_id());
    println!("Player   {:?}: {} ETH", chain.player(), format_eth(player));
    println!("Contract {:?}: {} ETH", chain.contract(), format_eth(house));
    println!(
        "Largest bet the house can cover: {} ETH",
        format_eth(multiplier.max_covered_bet(house))
    );
    Ok(())
}

pub async fn fund(chain: &EvmChain, amount: U256) -> Result<()> {
    let receipt = chain.fund(amount).await?;
    println!(
        "Funded contract with {} ETH in {:?}",
        format_eth(amount),
        receipt.transaction_hash
    );
    let house = chain.read_balance(chain.contract()).await?;
    println!("Contract balance: {} ETH", format_eth(house));
    Ok(())
}

pub async fn withdraw(chain: &EvmChain, amount: U256) -> Result<()> {
    let withdrawals = chain.withdraw(amount).await?;
    if withdrawals.is_empty() {
        warn!("withdraw confirmed without a Withdrawal event");
    }
    for withdrawal in withdrawals {
        println!(
            "Withdrew {} ETH to {:?}",
            format_eth(withdrawal.amount),
            withdrawal.to
        );
    }
    Ok(())
}

pub async fn register(
    env: DeploymentEnv,
    url: &str,
    address: Address,
    block: Option<u64>,
) -> Result<()> {
    let chain_id = match Provider::<Http>::try_from(url) {
        Ok(provider) => match provider.get_chainid().await {
            Ok(id) => Some(id.as_u64()),
            Err(err) => {
                warn!(?err, "could not read chain id, registering without it");
                None
            }
        },
        Err(err) => return Err(eyre!("Invalid RPC URL {url}: {err}")),
    };

    let abi_hash = compute_abi_hash(coinflip_abi::COINFLIP_ABI);
    let record = record_deployment(
        env,
        format!("{address:?}"),
        abi_hash,
        url,
        chain_id,
        block,
    )
    .map_err(|e| eyre!(e))?;
    info!(?address, %env, "registered deployment");
    println!(
        "Registered {} for {env} (chain id {})",
        record.contract_address,
        record
            .chain_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}
