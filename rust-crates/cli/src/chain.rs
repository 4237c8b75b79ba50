use std::{
    sync::Arc,
    time::Duration,
};

use coinflip_abi::{
    Coinflip,
    CoinflipErrors,
    GameResolvedFilter,
    WithdrawalFilter,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    ensure,
    eyre,
};
use ethers::{
    contract::{
        ContractError,
        EthEvent,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        PendingTransaction,
        Provider,
        ProviderError,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        Filter,
        TransactionReceipt,
        TransactionRequest,
        TxHash,
        U64,
        U256,
    },
};
use game_flow::{
    ChainClient,
    ChainError,
    Confirmation,
    ResolutionBatch,
    ResolutionSubscription,
    SubscriptionGuard,
};
use tokio::{
    sync::mpsc,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{
    debug,
    info,
    warn,
};

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

const RESOLUTION_BUFFER: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmSettings {
    /// Blocks on top of the inclusion block before a receipt counts.
    pub confirmations: usize,
    pub poll_interval: Duration,
    pub confirmation_timeout: Option<Duration>,
}

impl Default for EvmSettings {
    fn default() -> Self {
        Self {
            confirmations: 1,
            poll_interval: Duration::from_secs(2),
            confirmation_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// [`ChainClient`] backed by a JSON-RPC node and a local signing key.
pub struct EvmChain {
    client: Arc<SignerClient>,
    contract: Coinflip<SignerClient>,
    address: Address,
    settings: EvmSettings,
}

impl EvmChain {
    pub async fn connect(
        url: &str,
        wallet: LocalWallet,
        contract: Address,
        settings: EvmSettings,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(url)
            .wrap_err_with(|| format!("Invalid RPC URL {url}"))?
            .interval(settings.poll_interval);
        let chain_id = provider
            .get_chainid()
            .await
            .wrap_err_with(|| format!("Failed to reach node at {url}"))?
            .as_u64();
        let wallet = wallet.with_chain_id(chain_id);
        info!(chain_id, player = ?wallet.address(), ?contract, "connected to node");

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let instance = coinflip_abi::contract_instance(contract, client.clone());
        Ok(Self {
            client,
            contract: instance,
            address: contract,
            settings,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.client.signer().chain_id()
    }

    fn provider(&self) -> &Provider<Http> {
        self.client.provider()
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, ChainError> {
        let pending = PendingTransaction::new(tx_hash, self.provider())
            .confirmations(self.settings.confirmations)
            .interval(self.settings.poll_interval);
        let receipt = match self.settings.confirmation_timeout {
            Some(limit) => time::timeout(limit, pending)
                .await
                .map_err(|_| ChainError::Timeout(limit))?,
            None => pending.await,
        }
        .map_err(transport)?
        .ok_or(ChainError::Dropped(tx_hash))?;

        if receipt.status == Some(U64::zero()) {
            return Err(ChainError::Reverted(tx_hash));
        }
        Ok(receipt)
    }

    /// Tops up the house bankroll with a plain value transfer.
    pub async fn fund(&self, amount: U256) -> Result<TransactionReceipt> {
        let tx = TransactionRequest::new().to(self.address).value(amount);
        let tx_hash = self
            .client
            .send_transaction(tx, None)
            .await
            .wrap_err("Failed to send funding transaction")?
            .tx_hash();
        info!(?tx_hash, %amount, "funding contract");
        Ok(self.wait_for_receipt(tx_hash).await?)
    }

    /// Owner-only withdrawal from the house bankroll.
    pub async fn withdraw(&self, amount: U256) -> Result<Vec<WithdrawalFilter>> {
        let available = self.read_balance(self.address).await?;
        ensure!(
            available >= amount,
            "Contract holds {available} wei, cannot withdraw {amount} wei"
        );

        let call = self.contract.withdraw(amount);
        let tx_hash = call
            .send()
            .await
            .map_err(|err| eyre!(rejection(&err)))?
            .tx_hash();
        info!(?tx_hash, %amount, "withdrawing from contract");
        let receipt = self.wait_for_receipt(tx_hash).await?;
        Ok(coinflip_abi::decode_logs::<WithdrawalFilter>(
            &receipt.logs,
            self.address,
        )?)
    }
}

impl ChainClient for EvmChain {
    fn player(&self) -> Address {
        self.client.address()
    }

    fn contract(&self) -> Address {
        self.address
    }

    async fn submit_game_start(&self, bet: U256) -> Result<TxHash, ChainError> {
        let call = self.contract.new_game().value(bet);
        let tx_hash = call.send().await.map_err(|err| rejection(&err))?.tx_hash();
        info!(?tx_hash, %bet, "newGame submitted");
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Confirmation, ChainError> {
        let receipt = self.wait_for_receipt(tx_hash).await?;
        let block_number = receipt
            .block_number
            .ok_or_else(|| ChainError::Transport("receipt is missing its block number".into()))?
            .as_u64();
        Ok(Confirmation {
            tx_hash,
            block_number,
            logs: receipt.logs,
        })
    }

    async fn subscribe_resolutions(
        &self,
        from_block: u64,
    ) -> Result<ResolutionSubscription, ChainError> {
        // fail fast on a dead node instead of polling it forever
        self.provider().get_block_number().await.map_err(transport)?;

        let (sender, receiver) = mpsc::channel(RESOLUTION_BUFFER);
        let poller = ResolutionPoller {
            provider: self.provider().clone(),
            contract: self.address,
            next_block: from_block,
            poll_interval: self.settings.poll_interval,
        };
        let task = tokio::spawn(poller.run(sender));
        let guard = SubscriptionGuard::new(move || {
            task.abort();
            debug!("resolution poller stopped");
        });
        Ok(ResolutionSubscription::new(
            ReceiverStream::new(receiver),
            guard,
        ))
    }

    async fn read_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider()
            .get_balance(address, None)
            .await
            .map_err(transport)
    }
}

/// Polls `eth_getLogs` for `GameResolved` events of one contract.
struct ResolutionPoller {
    provider: Provider<Http>,
    contract: Address,
    next_block: u64,
    poll_interval: Duration,
}

impl ResolutionPoller {
    async fn run(mut self, batches: mpsc::Sender<ResolutionBatch>) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(from_block = self.next_block, contract = ?self.contract, "polling for resolutions");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = batches.closed() => {
                    debug!("resolution stream dropped");
                    return;
                }
            }

            match self.poll().await {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    if batches.send(batch).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!(?err, "failed to poll GameResolved logs"),
            }
        }
    }

    async fn poll(&mut self) -> Result<ResolutionBatch, ProviderError> {
        let latest = self.provider.get_block_number().await?.as_u64();
        if latest < self.next_block {
            return Ok(Vec::new());
        }

        let filter = Filter::new()
            .address(self.contract)
            .event(&GameResolvedFilter::abi_signature())
            .from_block(self.next_block)
            .to_block(latest);
        let logs = self.provider.get_logs(&filter).await?;
        self.next_block = latest + 1;

        let mut batch = Vec::with_capacity(logs.len());
        for log in &logs {
            match coinflip_abi::decode_log::<GameResolvedFilter>(log, self.contract) {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, tx = ?log.transaction_hash, "skipping undecodable GameResolved log")
                }
            }
        }
        Ok(batch)
    }
}

fn transport(err: ProviderError) -> ChainError {
    ChainError::Transport(err.to_string())
}

fn rejection(err: &ContractError<SignerClient>) -> ChainError {
    match err.decode_contract_revert::<CoinflipErrors>() {
        Some(revert) => ChainError::Rejected(coinflip_abi::describe_revert(&revert)),
        None => ChainError::Rejected(err.to_string()),
    }
}
