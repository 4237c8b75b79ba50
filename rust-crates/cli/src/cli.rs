use std::{
    path::PathBuf,
    time::Duration,
};

use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use ethers::{
    types::{
        Address,
        U256,
    },
    utils::parse_ether,
};
use game_flow::{
    CoinSide,
    FlowConfig,
};

use crate::{
    chain::EvmSettings,
    config::{
        AppConfig,
        DEFAULT_ARBITRUM_SEPOLIA_RPC_URL,
        DEFAULT_LOCAL_RPC_URL,
        DEFAULT_PRIVATE_KEY_ENV,
        NetworkTarget,
        WalletConfig,
    },
    wallets,
};

#[derive(Parser, Debug)]
#[command(
    name = "coinflip",
    about = "Flip a coin against the Coinflip contract and follow the game to resolution",
    version,
    group(
        ArgGroup::new("network")
            .args(["arbitrum_sepolia", "local"])
    )
)]
pub struct Cli {
    /// Play on Arbitrum Sepolia (default)
    #[arg(long)]
    pub arbitrum_sepolia: bool,

    /// Play against a local node
    #[arg(long)]
    pub local: bool,

    /// Override the RPC URL for the selected network
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Coinflip contract address (defaults to the registered or public deployment)
    #[arg(long, value_parser = parse_address)]
    pub contract: Option<Address>,

    /// Encrypted keystore name to sign with
    #[arg(long)]
    pub wallet: Option<String>,

    /// Override keystore directory (defaults to ~/.coinflip/keystores)
    #[arg(long)]
    pub wallet_dir: Option<String>,

    /// Environment variable holding a hex private key, used without --wallet
    #[arg(long, default_value = DEFAULT_PRIVATE_KEY_ENV)]
    pub private_key_env: String,

    /// Confirmations to wait for on each transaction
    #[arg(long, default_value_t = 1)]
    pub confirmations: usize,

    /// How often to poll the node, in milliseconds
    #[arg(long, default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Give up on a confirmation after this many seconds (0 waits forever)
    #[arg(long, default_value_t = 120)]
    pub confirmation_timeout_secs: u64,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Place a bet and wait for the coin to land
    Flip {
        /// Bet in ETH, e.g. 0.01, 0.05, 0.1 or 0.5
        #[arg(long, value_parser = parse_bet)]
        bet: U256,

        /// heads or tails
        #[arg(long, value_parser = parse_side)]
        side: CoinSide,

        /// Cancel if the game is not resolved within this many seconds
        #[arg(long)]
        resolution_timeout: Option<u64>,

        /// Print the final game snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show player and contract balances
    Balance,
    /// Send ETH to the contract's bankroll
    Fund {
        #[arg(long, value_parser = parse_bet)]
        amount: U256,
    },
    /// Withdraw ETH from the contract (owner only)
    Withdraw {
        #[arg(long, value_parser = parse_bet)]
        amount: U256,
    },
    /// Remember a contract address for the selected network
    Register {
        #[arg(long, value_parser = parse_address)]
        address: Address,

        /// Block the contract was deployed at
        #[arg(long)]
        block: Option<u64>,
    },
}

fn parse_bet(raw: &str) -> Result<U256, String> {
    let amount = parse_ether(raw.trim()).map_err(|err| format!("invalid ETH amount '{raw}': {err}"))?;
    if amount.is_zero() {
        return Err("amount must be greater than zero".to_string());
    }
    Ok(amount)
}

fn parse_side(raw: &str) -> Result<CoinSide, String> {
    raw.parse()
}

fn parse_address(raw: &str) -> Result<Address, String> {
    coinflip_abi::parse_address(raw).map_err(|err| err.to_string())
}

impl Cli {
    pub fn network(&self) -> NetworkTarget {
        let url = |default: &str| self.rpc_url.clone().unwrap_or_else(|| default.to_string());
        match (self.local, self.arbitrum_sepolia) {
            (true, _) => NetworkTarget::LocalNode {
                url: url(DEFAULT_LOCAL_RPC_URL),
            },
            (false, _) => NetworkTarget::ArbitrumSepolia {
                url: url(DEFAULT_ARBITRUM_SEPOLIA_RPC_URL),
            },
        }
    }

    pub fn wallet_config(&self) -> Result<WalletConfig> {
        match &self.wallet {
            Some(name) => Ok(WalletConfig::Keystore {
                name: name.clone(),
                dir: wallets::resolve_wallet_dir(self.wallet_dir.as_deref())?,
            }),
            None => Ok(WalletConfig::PrivateKeyEnv {
                var: self.private_key_env.clone(),
            }),
        }
    }

    pub fn evm_settings(&self) -> EvmSettings {
        EvmSettings {
            confirmations: self.confirmations,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            confirmation_timeout: (self.confirmation_timeout_secs > 0)
                .then(|| Duration::from_secs(self.confirmation_timeout_secs)),
        }
    }

    pub fn flow_config(&self) -> FlowConfig {
        let config = FlowConfig::default();
        match &self.command {
            Command::Flip {
                resolution_timeout: Some(secs),
                ..
            } => config.with_resolution_timeout(Duration::from_secs(*secs)),
            _ => config,
        }
    }

    pub fn app_config(&self) -> Result<AppConfig> {
        Ok(AppConfig {
            network: self.network(),
            wallet: self.wallet_config()?,
            contract: self.contract,
            evm: self.evm_settings(),
            flow: self.flow_config(),
        })
    }
}
