use std::{
    pin::pin,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

use chrono::Utc;
use coinflip_abi::GameResolvedFilter;
use ethers::types::{
    Log,
    TxHash,
    U256,
};
use futures::{
    StreamExt,
    stream::BoxStream,
};
use tokio::{
    sync::{
        Notify,
        watch,
    },
    time,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    affordability,
    chain::ChainClient,
    config::FlowConfig,
    error::{
        ChainError,
        FlowError,
    },
    game::{
        Balances,
        CoinSide,
        FlowSnapshot,
        Game,
        GameStatus,
        Outcome,
    },
    status::{
        Milestone,
        StatusReporter,
    },
    subscription::{
        NonceFilter,
        ResolutionBatch,
        SubscriptionGuard,
    },
};

#[cfg(test)]
mod tests;

struct FlowState {
    status: GameStatus,
    game: Option<Game>,
    reporter: StatusReporter,
    subscription: Option<SubscriptionGuard>,
    balances: Option<Balances>,
    // bumped by every start, cancel and reset; continuations from an older
    // generation are stale
    generation: u64,
}

impl FlowState {
    fn new() -> Self {
        Self {
            status: GameStatus::Idle,
            game: None,
            reporter: StatusReporter::new(),
            subscription: None,
            balances: None,
            generation: 0,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status.is_in_flight()
    }

    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            status: self.status.clone(),
            game: self.game.clone(),
            steps: self.reporter.steps().to_vec(),
            balances: self.balances,
        }
    }
}

enum Resolution {
    Matched(GameResolvedFilter),
    Closed,
    Stale,
}

/// Drives one game at a time from submission to resolution against a
/// [`ChainClient`].
pub struct GameFlow<C> {
    chain: Arc<C>,
    config: FlowConfig,
    state: Mutex<FlowState>,
    updates: watch::Sender<FlowSnapshot>,
    cancelled: Notify,
}

impl<C: ChainClient> GameFlow<C> {
    pub fn new(chain: Arc<C>, config: FlowConfig) -> Self {
        let (updates, _) = watch::channel(FlowSnapshot::idle());
        Self {
            chain,
            config,
            state: Mutex::new(FlowState::new()),
            updates,
            cancelled: Notify::new(),
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.lock().snapshot()
    }

    /// Receives a fresh snapshot after every transition and status step.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.updates.subscribe()
    }

    /// Places `bet` on `side` and waits for the game to resolve.
    ///
    /// Balances are read fresh and checked before anything is submitted. A
    /// failed check leaves the flow `Idle`. Once submitted there are no retries:
    /// every error after that point leaves the flow `Failed` until [`Self::reset`].
    pub async fn start(&self, bet: U256, side: CoinSide) -> Result<Outcome, FlowError> {
        {
            let state = self.lock();
            if state.status != GameStatus::Idle {
                return Err(FlowError::FlowInProgress(state.status.name()));
            }
        }
        if bet.is_zero() {
            return Err(FlowError::ZeroBet);
        }

        let balances = self
            .read_balances()
            .await
            .map_err(FlowError::BalanceUnavailable)?;
        if let Err(shortfall) = affordability::check(
            balances.player,
            balances.house,
            bet,
            self.config.payout_multiplier,
        ) {
            info!(%bet, %shortfall, "refusing to start game");
            self.update(|state| state.balances = Some(balances));
            return Err(FlowError::Precondition(shortfall));
        }

        let player = self.chain.player();
        let generation = self.update(|state| {
            if state.status != GameStatus::Idle {
                return Err(FlowError::FlowInProgress(state.status.name()));
            }
            state.generation += 1;
            state.balances = Some(balances);
            state.game = Some(Game {
                player,
                bet,
                chosen_side: side,
                tx_hash: None,
                nonce: None,
            });
            state.status = GameStatus::AwaitingConfirmation;
            state.reporter.append(Milestone::ConfirmingTransaction);
            Ok(state.generation)
        })?;

        info!(%bet, %side, ?player, "submitting game");
        let tx_hash = match self.chain.submit_game_start(bet).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return Err(self.fail(generation, FlowError::Submission(err))),
        };
        self.advance(generation, |state| {
            if let Some(game) = state.game.as_mut() {
                game.tx_hash = Some(tx_hash);
            }
        })?;

        debug!(?tx_hash, "awaiting confirmation");
        let confirmation = match self.chain.await_confirmation(tx_hash).await {
            Ok(confirmation) => confirmation,
            Err(err) => return Err(self.fail(generation, FlowError::Confirmation(err))),
        };
        self.advance(generation, |_| ())?;

        let nonce = match self.creation_nonce(tx_hash, &confirmation.logs) {
            Ok(nonce) => nonce,
            Err(err) => return Err(self.fail(generation, err)),
        };
        self.advance(generation, |state| {
            if let Some(game) = state.game.as_mut() {
                game.nonce = Some(nonce);
            }
            state.status = GameStatus::AwaitingResolution { nonce };
            state.reporter.append(Milestone::GameStarted);
        })?;
        info!(%nonce, block = confirmation.block_number, "game started");

        let subscription = match self
            .chain
            .subscribe_resolutions(confirmation.block_number)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => return Err(self.fail(generation, FlowError::Subscription(err))),
        };
        let (mut batches, guard) = subscription.into_parts();
        let orphaned = {
            let mut state = self.lock();
            if state.is_current(generation) {
                state.subscription = Some(guard);
                None
            } else {
                Some(guard)
            }
        };
        if let Some(mut guard) = orphaned {
            guard.release();
            return Err(FlowError::Cancelled);
        }

        let filter = NonceFilter::new(nonce);
        let resolution = match self.config.resolution_timeout {
            Some(limit) => {
                let waiting = self.await_resolution(generation, filter, &mut batches);
                match time::timeout(limit, waiting).await {
                    Ok(resolution) => resolution,
                    Err(_) => {
                        warn!(%nonce, ?limit, "no resolution before timeout, cancelling");
                        return if self.cancel_generation(Some(generation)) {
                            Err(FlowError::ResolutionTimedOut(limit))
                        } else {
                            Err(FlowError::Cancelled)
                        };
                    }
                }
            }
            None => self.await_resolution(generation, filter, &mut batches).await,
        };

        match resolution {
            Resolution::Matched(event) => self.resolve(generation, side, event).await,
            Resolution::Closed => Err(self.fail(generation, FlowError::StreamClosed(nonce))),
            Resolution::Stale => Err(FlowError::Cancelled),
        }
    }

    /// Abandons the current game. In-flight chain calls are not aborted, their
    /// results are ignored when they arrive. Returns `false` if the flow was
    /// already terminal.
    pub fn cancel(&self) -> bool {
        self.cancel_generation(None)
    }

    /// Returns a terminal flow to `Idle` so another game can start.
    pub fn reset(&self) -> Result<(), FlowError> {
        let leftover = {
            let mut state = self.lock();
            if state.status == GameStatus::Idle {
                return Ok(());
            }
            if !state.status.is_terminal() {
                return Err(FlowError::FlowInProgress(state.status.name()));
            }
            state.generation += 1;
            state.status = GameStatus::Idle;
            state.game = None;
            state.reporter.reset();
            let leftover = state.subscription.take();
            self.publish(&state);
            leftover
        };
        if let Some(mut guard) = leftover {
            guard.release();
        }
        Ok(())
    }

    /// Re-reads the player's and the house's balances.
    pub async fn refresh_balances(&self) -> Result<Balances, ChainError> {
        let balances = self.read_balances().await?;
        self.update(|state| state.balances = Some(balances));
        Ok(balances)
    }

    async fn read_balances(&self) -> Result<Balances, ChainError> {
        let (player, house) = futures::try_join!(
            self.chain.read_balance(self.chain.player()),
            self.chain.read_balance(self.chain.contract()),
        )?;
        Ok(Balances {
            player,
            house,
            read_at: Utc::now(),
        })
    }

    fn creation_nonce(
        &self,
        tx_hash: TxHash,
        logs: &[Log],
    ) -> Result<U256, FlowError> {
        let own_logs: Vec<_> = logs
            .iter()
            .filter(|log| log.transaction_hash.is_none_or(|hash| hash == tx_hash))
            .cloned()
            .collect();
        let created = self
            .chain
            .decode_creations(&own_logs)
            .map_err(FlowError::Decode)?;
        match created.first() {
            Some(event) => Ok(event.nonce),
            None => {
                error!(
                    ?tx_hash,
                    contract = ?self.chain.contract(),
                    logs = logs.len(),
                    "confirmed game transaction emitted no GameCreated event; contract interface mismatch"
                );
                Err(FlowError::ProtocolMismatch(tx_hash))
            }
        }
    }

    async fn await_resolution(
        &self,
        generation: u64,
        filter: NonceFilter,
        batches: &mut BoxStream<'static, ResolutionBatch>,
    ) -> Resolution {
        loop {
            let mut cancelled = pin!(self.cancelled.notified());
            cancelled.as_mut().enable();
            if !self.is_current(generation) {
                return Resolution::Stale;
            }

            let batch = tokio::select! {
                batch = batches.next() => batch,
                _ = cancelled => return Resolution::Stale,
            };
            let Some(batch) = batch else {
                return if self.is_current(generation) {
                    Resolution::Closed
                } else {
                    Resolution::Stale
                };
            };
            if !self.is_current(generation) {
                return Resolution::Stale;
            }
            match filter.find(&batch) {
                Some(event) => return Resolution::Matched(event.clone()),
                None => debug!(events = batch.len(), "no resolution for this game in batch"),
            }
        }
    }

    async fn resolve(
        &self,
        generation: u64,
        side: CoinSide,
        event: GameResolvedFilter,
    ) -> Result<Outcome, FlowError> {
        let outcome = Outcome::derive(side, event.won);
        let guard = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return Err(FlowError::Cancelled);
            }
            state.reporter.append(Milestone::GameResolved);
            state.status = GameStatus::Resolved(outcome);
            let guard = state.subscription.take();
            self.publish(&state);
            guard
        };
        if let Some(mut guard) = guard {
            guard.release();
        }
        info!(nonce = %event.nonce, won = event.won, side = %outcome.side, "game resolved");

        if let Err(err) = self.refresh_balances().await {
            warn!(?err, "failed to refresh balances after resolution");
        }
        Ok(outcome)
    }

    /// Moves the flow to `Failed` unless it was cancelled in the meantime, in
    /// which case the caller just sees `Cancelled`.
    fn fail(&self, generation: u64, err: FlowError) -> FlowError {
        let guard = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                debug!(%err, "ignoring failure of a cancelled game");
                return FlowError::Cancelled;
            }
            state.status = GameStatus::Failed(err.clone());
            let guard = state.subscription.take();
            self.publish(&state);
            guard
        };
        if let Some(mut guard) = guard {
            guard.release();
        }
        warn!(%err, "game flow failed");
        err
    }

    fn cancel_generation(&self, generation: Option<u64>) -> bool {
        let guard = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            if generation.is_some_and(|generation| state.generation != generation) {
                return false;
            }
            state.generation += 1;
            state.status = GameStatus::Cancelled;
            state.reporter.reset();
            let guard = state.subscription.take();
            self.publish(&state);
            guard
        };
        self.cancelled.notify_waiters();
        if let Some(mut guard) = guard {
            guard.release();
        }
        info!("game flow cancelled");
        true
    }

    /// Applies `f` only if `generation` is still the live, non-terminal game.
    fn advance(
        &self,
        generation: u64,
        f: impl FnOnce(&mut FlowState),
    ) -> Result<(), FlowError> {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return Err(FlowError::Cancelled);
        }
        f(&mut state);
        self.publish(&state);
        Ok(())
    }

    fn update<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.publish(&state);
        result
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().is_current(generation)
    }

    fn publish(&self, state: &FlowState) {
        self.updates.send_replace(state.snapshot());
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
