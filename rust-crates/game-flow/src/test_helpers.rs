//! In-memory [`ChainClient`] with scripted outcomes for driving [`GameFlow`]
//! through every path without a node.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};

use coinflip_abi::test_helpers::{
    game_created_log,
    truncated_log,
};
use ethers::types::{
    Address,
    H256,
    TxHash,
    U256,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    chain::{
        ChainClient,
        Confirmation,
    },
    error::ChainError,
    game::{
        FlowSnapshot,
        GameStatus,
    },
    orchestrator::GameFlow,
    subscription::{
        ResolutionBatch,
        ResolutionSubscription,
        SubscriptionGuard,
    },
};

pub const FAKE_CONFIRMATION_BLOCK: u64 = 100;
const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

pub fn milli_eth(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(15)
}

/// How the next `await_confirmation` call answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationScript {
    /// Receipt carrying a well-formed `GameCreated` log with the next nonce.
    Created,
    /// Receipt without any creation log.
    NoCreationEvent,
    /// Creation log attributed to some other transaction.
    ForeignCreationEvent,
    /// Creation log whose data section cannot be decoded.
    MalformedCreationEvent,
    Fail(ChainError),
}

/// Holds the next confirmation back until opened or dropped.
pub struct ConfirmationGate {
    sender: oneshot::Sender<()>,
}

impl ConfirmationGate {
    pub fn open(self) {
        let _ = self.sender.send(());
    }
}

#[derive(Default)]
struct Counters {
    balance_reads: AtomicUsize,
    submissions: AtomicUsize,
    confirmations: AtomicUsize,
    subscriptions: AtomicUsize,
    releases: AtomicUsize,
}

type Subscribers = Vec<(u64, mpsc::UnboundedSender<ResolutionBatch>)>;

pub struct FakeChain {
    player: Address,
    contract: Address,
    balances: Mutex<HashMap<Address, U256>>,
    balance_error: Mutex<Option<ChainError>>,
    submit_error: Mutex<Option<ChainError>>,
    confirmation: Mutex<Option<ConfirmationScript>>,
    subscribe_error: Mutex<Option<ChainError>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    next_nonce: AtomicU64,
    next_subscription: AtomicU64,
    subscribers: Arc<Mutex<Subscribers>>,
    counters: Arc<Counters>,
    last_from_block: Mutex<Option<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    /// Player holding 10 ETH against a house holding 100 ETH.
    pub fn new() -> Self {
        let player = Address::from_low_u64_be(0x0001);
        let contract = Address::from_low_u64_be(0xc0f1);
        let balances = HashMap::from([(player, eth(10)), (contract, eth(100))]);
        Self {
            player,
            contract,
            balances: Mutex::new(balances),
            balance_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            confirmation: Mutex::new(None),
            subscribe_error: Mutex::new(None),
            gate: Mutex::new(None),
            next_nonce: AtomicU64::new(1),
            next_subscription: AtomicU64::new(0),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            last_from_block: Mutex::new(None),
        }
    }

    pub fn set_player_balance(&self, amount: U256) {
        lock(&self.balances).insert(self.player, amount);
    }

    pub fn set_house_balance(&self, amount: U256) {
        lock(&self.balances).insert(self.contract, amount);
    }

    pub fn fail_balance_reads(&self, err: Option<ChainError>) {
        *lock(&self.balance_error) = err;
    }

    /// The next submission fails with `err`.
    pub fn fail_next_submission(&self, err: ChainError) {
        *lock(&self.submit_error) = Some(err);
    }

    /// Scripts the next confirmation; later ones fall back to `Created`.
    pub fn script_next_confirmation(&self, script: ConfirmationScript) {
        *lock(&self.confirmation) = Some(script);
    }

    pub fn fail_next_subscription(&self, err: ChainError) {
        *lock(&self.subscribe_error) = Some(err);
    }

    pub fn hold_next_confirmation(&self) -> ConfirmationGate {
        let (sender, receiver) = oneshot::channel();
        *lock(&self.gate) = Some(receiver);
        ConfirmationGate { sender }
    }

    pub fn set_next_nonce(&self, nonce: u64) {
        self.next_nonce.store(nonce, Ordering::SeqCst);
    }

    /// Sends `batch` to every open subscription, returning how many received it.
    pub fn deliver(&self, batch: ResolutionBatch) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|(_, sender)| sender.send(batch.clone()).is_ok())
            .count()
    }

    /// Ends every open stream without releasing it, as a dropped connection would.
    pub fn close_streams(&self) {
        lock(&self.subscribers).clear();
    }

    pub fn player_address(&self) -> Address {
        self.player
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    pub fn balance_reads(&self) -> usize {
        self.counters.balance_reads.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.counters.submissions.load(Ordering::SeqCst)
    }

    pub fn confirmations(&self) -> usize {
        self.counters.confirmations.load(Ordering::SeqCst)
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.counters.subscriptions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub fn open_subscriptions(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn last_from_block(&self) -> Option<u64> {
        *lock(&self.last_from_block)
    }

    /// Waits until at least `count` subscriptions are open.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            while self.open_subscriptions() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription was never opened");
    }

    /// Waits until `submissions() >= count`.
    pub async fn wait_for_submissions(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            while self.submissions() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("game was never submitted");
    }

    fn tx_hash(sequence: usize) -> TxHash {
        H256::from_low_u64_be(sequence as u64)
    }
}

impl ChainClient for FakeChain {
    fn player(&self) -> Address {
        self.player
    }

    fn contract(&self) -> Address {
        self.contract
    }

    async fn submit_game_start(&self, _bet: U256) -> Result<TxHash, ChainError> {
        let sequence = self.counters.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = lock(&self.submit_error).take() {
            return Err(err);
        }
        Ok(Self::tx_hash(sequence))
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Confirmation, ChainError> {
        self.counters.confirmations.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let script = lock(&self.confirmation)
            .take()
            .unwrap_or(ConfirmationScript::Created);
        let created = |tx_hash: TxHash| {
            let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
            game_created_log(
                self.contract,
                tx_hash,
                U256::from(nonce),
                self.player,
                U256::one(),
            )
        };
        let logs = match script {
            ConfirmationScript::Created => vec![created(tx_hash)],
            ConfirmationScript::NoCreationEvent => Vec::new(),
            ConfirmationScript::ForeignCreationEvent => {
                vec![created(H256::repeat_byte(0xee))]
            }
            ConfirmationScript::MalformedCreationEvent => {
                vec![truncated_log(&created(tx_hash))]
            }
            ConfirmationScript::Fail(err) => return Err(err),
        };
        Ok(Confirmation {
            tx_hash,
            block_number: FAKE_CONFIRMATION_BLOCK,
            logs,
        })
    }

    async fn subscribe_resolutions(
        &self,
        from_block: u64,
    ) -> Result<ResolutionSubscription, ChainError> {
        if let Some(err) = lock(&self.subscribe_error).take() {
            return Err(err);
        }
        *lock(&self.last_from_block) = Some(from_block);

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscribers).push((id, sender));
        self.counters.subscriptions.fetch_add(1, Ordering::SeqCst);

        let subscribers = self.subscribers.clone();
        let counters = self.counters.clone();
        let guard = SubscriptionGuard::new(move || {
            counters.releases.fetch_add(1, Ordering::SeqCst);
            lock(&subscribers).retain(|(open, _)| *open != id);
        });
        Ok(ResolutionSubscription::new(
            UnboundedReceiverStream::new(receiver),
            guard,
        ))
    }

    async fn read_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.counters.balance_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.balance_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.balances)
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}

/// Waits for the first snapshot whose status satisfies `predicate`.
pub async fn wait_for_status<C: ChainClient>(
    flow: &GameFlow<C>,
    predicate: impl Fn(&GameStatus) -> bool,
) -> FlowSnapshot {
    let mut updates = flow.subscribe();
    let reached = updates.wait_for(|snapshot| predicate(&snapshot.status));
    let snapshot = tokio::time::timeout(WAIT_LIMIT, reached)
        .await
        .expect("flow never reached the expected status")
        .expect("flow dropped while waiting")
        .clone();
    snapshot
}
