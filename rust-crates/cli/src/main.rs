use std::{
    path::Path,
    sync::{
        Arc,
        OnceLock,
    },
};

use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::DeploymentStore;
use ethers::signers::LocalWallet;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

use crate::{
    chain::EvmChain,
    cli::{
        Cli,
        Command,
    },
    config::{
        AppConfig,
        WalletConfig,
    },
};

mod chain;
mod cli;
mod commands;
mod config;
mod wallets;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn init_tracing(log_dir: &Path, verbose: bool) -> Result<()> {
    let appender = rolling::daily(log_dir, "coinflip.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|err| eyre!("Failed to install tracing subscriber: {err}"))
}

fn load_wallet(config: &WalletConfig) -> Result<LocalWallet> {
    match config {
        WalletConfig::Keystore { name, dir } => {
            let descriptor = wallets::find_wallet(dir, name)?;
            wallets::unlock_wallet(&descriptor)
        }
        WalletConfig::PrivateKeyEnv { var } => wallets::wallet_from_env(var),
    }
}

async fn connect(config: &AppConfig) -> Result<EvmChain> {
    let store = DeploymentStore::new(config.network.env()).map_err(|e| eyre!(e))?;
    let contract = config::resolve_contract(&config.network, config.contract, &store)?;
    let wallet = load_wallet(&config.wallet)?;
    EvmChain::connect(config.network.url(), wallet, contract, config.evm.clone())
        .await
        .wrap_err_with(|| format!("Failed to connect to {}", config.network.env()))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&cli.log_dir, cli.verbose)?;
    tracing::info!("starting coinflip client");

    let config = cli.app_config()?;
    match cli.command {
        Command::Flip {
            bet, side, json, ..
        } => {
            let chain = Arc::new(connect(&config).await?);
            commands::flip(chain, config.flow, bet, side, json).await
        }
        Command::Balance => {
            let chain = connect(&config).await?;
            commands::balance(&chain, config.flow.payout_multiplier).await
        }
        Command::Fund { amount } => {
            let chain = connect(&config).await?;
            commands::fund(&chain, amount).await
        }
        Command::Withdraw { amount } => {
            let chain = connect(&config).await?;
            commands::withdraw(&chain, amount).await
        }
        Command::Register { address, block } => {
            commands::register(config.network.env(), config.network.url(), address, block)
                .await
        }
    }
}
