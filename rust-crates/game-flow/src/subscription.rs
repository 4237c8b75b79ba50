use std::fmt;

use coinflip_abi::GameResolvedFilter;
use ethers::types::U256;
use futures::{
    Stream,
    StreamExt,
    stream::BoxStream,
};

/// One delivery from the resolution stream. May hold events for any game.
pub type ResolutionBatch = Vec<GameResolvedFilter>;

/// Releases an open event subscription exactly once, either explicitly or on drop.
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl SubscriptionGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Returns `true` if this call performed the release.
    pub fn release(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("released", &self.is_released())
            .finish()
    }
}

pub struct ResolutionSubscription {
    batches: BoxStream<'static, ResolutionBatch>,
    guard: SubscriptionGuard,
}

impl ResolutionSubscription {
    pub fn new(
        batches: impl Stream<Item = ResolutionBatch> + Send + 'static,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            batches: batches.boxed(),
            guard,
        }
    }

    pub fn into_parts(self) -> (BoxStream<'static, ResolutionBatch>, SubscriptionGuard) {
        (self.batches, self.guard)
    }
}

/// Picks this game's resolution out of a contract-wide event stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonceFilter {
    nonce: U256,
}

impl NonceFilter {
    pub fn new(nonce: U256) -> Self {
        Self { nonce }
    }

    pub fn matches(&self, event: &GameResolvedFilter) -> bool {
        event.nonce == self.nonce
    }

    /// First event in `batch` belonging to this game.
    pub fn find<'a>(&self, batch: &'a [GameResolvedFilter]) -> Option<&'a GameResolvedFilter> {
        batch.iter().find(|event| self.matches(event))
    }
}
