pub mod affordability;
pub mod chain;
pub mod config;
pub mod error;
pub mod game;
pub mod orchestrator;
pub mod status;
pub mod subscription;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use chain::{
    ChainClient,
    Confirmation,
};
pub use config::FlowConfig;
pub use error::{
    ChainError,
    FlowError,
};
pub use game::{
    Balances,
    CoinSide,
    FlowSnapshot,
    Game,
    GameStatus,
    Outcome,
};
pub use orchestrator::GameFlow;
pub use status::{
    Milestone,
    StatusReporter,
    StatusStep,
};
pub use subscription::{
    NonceFilter,
    ResolutionBatch,
    ResolutionSubscription,
    SubscriptionGuard,
};
