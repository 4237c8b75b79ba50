use std::time::Duration;

use crate::affordability::PayoutMultiplier;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    pub payout_multiplier: PayoutMultiplier,
    /// How long to wait for the resolution event. `None` waits indefinitely;
    /// on expiry the flow is cancelled.
    pub resolution_timeout: Option<Duration>,
}

impl FlowConfig {
    pub fn with_resolution_timeout(mut self, timeout: Duration) -> Self {
        self.resolution_timeout = Some(timeout);
        self
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            payout_multiplier: PayoutMultiplier::STANDARD,
            resolution_timeout: None,
        }
    }
}
