//! Read-only monitoring strategy: observes balances and never trades.

use async_trait::async_trait;

use super::{Action, AgentSnapshot, Strategy};
use crate::wallet::guard::lamports_to_sol_string;
use crate::Result;

#[derive(Debug, Default)]
pub struct MonitorStrategy;

impl MonitorStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for MonitorStrategy {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn decide(&mut self, snapshot: &AgentSnapshot) -> Result<Action> {
        Ok(Action::noop(format!(
            "monitoring: {} SOL, {} tracked token accounts",
            lamports_to_sol_string(snapshot.sol_balance),
            snapshot.token_balances.len(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn always_noops() {
        let mut strategy = MonitorStrategy::new();
        let snapshot = AgentSnapshot {
            sol_balance: 1_500_000_000,
            token_balances: HashMap::new(),
            tick_count: 1,
            last_action_at: None,
        };

        let action = strategy.decide(&snapshot).await.unwrap();
        assert_eq!(action.kind(), "noop");
        assert!(action.rationale().contains("1.500000"));
    }
}
