//! Execution-time budget granted to one scheduler pass

use std::time::Duration;

use tokio::time::Instant;

/// Time the host allows a pass to run.
///
/// `reserve` is the longest a single delivery may take. A pass only starts a
/// new delivery when at least that much budget is left, so an attempt never
/// straddles the deadline.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudget {
    deadline: Option<Instant>,
    reserve: Duration,
}

impl ExecutionBudget {
    /// No deadline; the pass drains the due set
    pub const fn unbounded() -> Self {
        Self {
            deadline: None,
            reserve: Duration::ZERO,
        }
    }

    /// Budget of `limit` starting now
    pub fn new(limit: Duration, reserve: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
            reserve,
        }
    }

    /// Time left, or `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn allows_another_attempt(&self) -> bool {
        self.remaining()
            .is_none_or(|remaining| !remaining.is_zero() && remaining >= self.reserve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_budget_always_allows() {
        let budget = ExecutionBudget::unbounded();
        assert!(budget.remaining().is_none());
        assert!(budget.allows_another_attempt());
    }

    #[test]
    fn budget_smaller_than_reserve_stops_early() {
        let budget = ExecutionBudget::new(Duration::from_secs(5), Duration::from_secs(30));
        assert!(!budget.allows_another_attempt());
    }

    #[test]
    fn generous_budget_allows_attempts() {
        let budget = ExecutionBudget::new(Duration::from_secs(300), Duration::from_secs(30));
        assert!(budget.allows_another_attempt());
        assert!(budget.remaining().unwrap() <= Duration::from_secs(300));
    }

    #[test]
    fn exhausted_budget_without_reserve_stops() {
        let budget = ExecutionBudget::new(Duration::ZERO, Duration::ZERO);
        assert!(!budget.allows_another_attempt());
    }
}
