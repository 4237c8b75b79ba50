use std::path::PathBuf;

use color_eyre::eyre::{
    Result,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
    compute_abi_hash,
};
use ethers::types::Address;
use game_flow::FlowConfig;
use tracing::{
    info,
    warn,
};

use crate::chain::EvmSettings;

pub const DEFAULT_ARBITRUM_SEPOLIA_RPC_URL: &str = "https://sepolia-rollup.arbitrum.io/rpc";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8547";
pub const DEFAULT_PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    ArbitrumSepolia { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::ArbitrumSepolia { url } | NetworkTarget::LocalNode { url } => url,
        }
    }

    pub fn env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::ArbitrumSepolia { .. } => DeploymentEnv::ArbitrumSepolia,
            NetworkTarget::LocalNode { .. } => DeploymentEnv::Local,
        }
    }

    /// Address of the publicly deployed contract, if this network has one.
    pub fn known_contract(&self) -> Option<&'static str> {
        match self {
            NetworkTarget::ArbitrumSepolia { .. } => {
                Some(coinflip_abi::ARBITRUM_SEPOLIA_COINFLIP_ADDRESS)
            }
            NetworkTarget::LocalNode { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletConfig {
    Keystore { name: String, dir: PathBuf },
    PrivateKeyEnv { var: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet: WalletConfig,
    pub contract: Option<Address>,
    pub evm: EvmSettings,
    pub flow: FlowConfig,
}

/// Picks the contract to play against: an explicit address wins, then the newest
/// registered deployment built from the same ABI, then the network's public one.
pub fn resolve_contract(
    network: &NetworkTarget,
    explicit: Option<Address>,
    store: &DeploymentStore,
) -> Result<Address> {
    if let Some(address) = explicit {
        return Ok(address);
    }

    let abi_hash = compute_abi_hash(coinflip_abi::COINFLIP_ABI);
    let compatible = store.latest_compatible(&abi_hash).map_err(|e| eyre!(e))?;
    if let Some(record) = compatible {
        info!(
            address = %record.contract_address,
            registered_at = %record.registered_at,
            "using registered deployment"
        );
        return coinflip_abi::parse_address(&record.contract_address).map_err(|e| eyre!(e));
    }
    if let Some(stale) = store.latest().map_err(|e| eyre!(e))? {
        warn!(
            address = %stale.contract_address,
            "ignoring deployment registered against a different ABI"
        );
    }

    match network.known_contract() {
        Some(address) => coinflip_abi::parse_address(address).map_err(|e| eyre!(e)),
        None => Err(eyre!(
            "No Coinflip contract known for {}; pass --contract <address> or run `coinflip register`",
            network.env()
        )),
    }
}
