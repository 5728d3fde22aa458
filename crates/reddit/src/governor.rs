//! Pre-call budget checks against the live rate-limit snapshot.
//!
//! Budget pressure is a voluntary sleep, never an error: when the
//! account's remaining allowance dips to the safety threshold the caller
//! blocks until the window resets, plus a small margin.

use std::time::Duration;

use tracing::{debug, info};

use subfleet_core::models::RateLimitSnapshot;

use crate::transport::CountingTransport;

/// Safety margin added on top of the reported reset window.
const RESET_MARGIN: Duration = Duration::from_secs(5);

/// Precautionary pause when no snapshot is available yet.
const PRECAUTION_SLEEP: Duration = Duration::from_secs(1);

/// Outcome of a budget evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Proceed,
    /// Remaining allowance at or under the threshold; wait out the reset.
    WaitForReset(Duration),
    /// Snapshot not yet populated; brief precautionary pause.
    Precaution(Duration),
}

/// Pure decision function over a snapshot. Separated from the sleep so
/// the policy is testable without a clock.
pub fn evaluate_budget(snapshot: &RateLimitSnapshot, min_remaining: u32) -> BudgetDecision {
    let (Some(remaining), Some(reset_in)) = (snapshot.remaining, snapshot.reset_in_seconds)
    else {
        return BudgetDecision::Precaution(PRECAUTION_SLEEP);
    };

    if remaining <= min_remaining as f64 && reset_in > 0.0 {
        return BudgetDecision::WaitForReset(Duration::from_secs_f64(reset_in) + RESET_MARGIN);
    }

    BudgetDecision::Proceed
}

/// Inspect the transport's snapshot and sleep if the budget is low.
/// Never raises.
pub async fn check_budget(transport: &CountingTransport, min_remaining: u32) {
    let snapshot = transport.rate_limit_snapshot();

    match evaluate_budget(&snapshot, min_remaining) {
        BudgetDecision::Proceed => {
            debug!(
                remaining = ?snapshot.remaining,
                used = ?snapshot.used,
                "rate budget ok"
            );
        }
        BudgetDecision::WaitForReset(wait) => {
            info!(
                remaining = ?snapshot.remaining,
                wait_secs = wait.as_secs(),
                "rate budget low, waiting for reset"
            );
            tokio::time::sleep(wait).await;
            info!("rate limit window reset, continuing");
        }
        BudgetDecision::Precaution(wait) => {
            debug!("rate limit snapshot unavailable, precautionary delay");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(remaining: Option<f64>, reset_in: Option<f64>) -> RateLimitSnapshot {
        RateLimitSnapshot {
            remaining,
            used: remaining.map(|r| 600.0 - r),
            reset_in_seconds: reset_in,
        }
    }

    #[test]
    fn proceeds_with_budget_to_spare() {
        assert_eq!(
            evaluate_budget(&snapshot(Some(400.0), Some(120.0)), 50),
            BudgetDecision::Proceed
        );
    }

    #[test]
    fn waits_with_margin_when_budget_low() {
        let decision = evaluate_budget(&snapshot(Some(50.0), Some(30.0)), 50);
        assert_eq!(
            decision,
            BudgetDecision::WaitForReset(Duration::from_secs(35))
        );
    }

    #[test]
    fn proceeds_when_reset_already_passed() {
        assert_eq!(
            evaluate_budget(&snapshot(Some(10.0), Some(0.0)), 50),
            BudgetDecision::Proceed
        );
    }

    #[test]
    fn missing_snapshot_takes_precaution() {
        assert!(matches!(
            evaluate_budget(&snapshot(None, None), 50),
            BudgetDecision::Precaution(_)
        ));
        assert!(matches!(
            evaluate_budget(&snapshot(Some(100.0), None), 50),
            BudgetDecision::Precaution(_)
        ));
    }
}
