use std::fmt;

use chrono::{
    DateTime,
    Utc,
};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Milestone {
    #[serde(rename = "Confirming transaction")]
    ConfirmingTransaction,
    #[serde(rename = "Game started")]
    GameStarted,
    #[serde(rename = "Game resolved")]
    GameResolved,
}

impl Milestone {
    pub fn label(&self) -> &'static str {
        match self {
            Milestone::ConfirmingTransaction => "Confirming transaction",
            Milestone::GameStarted => "Game started",
            Milestone::GameResolved => "Game resolved",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusStep {
    #[serde(rename = "label")]
    pub milestone: Milestone,
    pub occurred_at: DateTime<Utc>,
}

impl StatusStep {
    pub fn label(&self) -> &'static str {
        self.milestone.label()
    }
}

/// Ordered audit trail of milestones for the current game.
#[derive(Clone, Debug, Default)]
pub struct StatusReporter {
    steps: Vec<StatusStep>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, milestone: Milestone) -> &StatusStep {
        self.steps.push(StatusStep {
            milestone,
            occurred_at: Utc::now(),
        });
        &self.steps[self.steps.len() - 1]
    }

    pub fn reset(&mut self) {
        self.steps.clear();
    }

    pub fn steps(&self) -> &[StatusStep] {
        &self.steps
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.steps.iter().map(StatusStep::label).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
