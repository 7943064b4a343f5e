use chrono::{DateTime, Utc};

pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Time-proportional reward accrual. Deterministic and side-effect free; this
/// is the single accrual formula used by the claim path and by any fallback
/// estimate, so the two can never drift apart.
pub fn accrued(principal: f64, apr_percent: f64, elapsed_secs: f64) -> f64 {
    let elapsed = elapsed_secs.max(0.0);
    principal * (apr_percent / 100.0) * elapsed / SECONDS_PER_YEAR
}

/// Accrual since the last checkpoint: `last_claim_at` when a claim has
/// happened, else `created_at`. Clock skew (checkpoint in the future) clamps
/// to zero rather than going negative.
pub fn accrued_since(
    principal: f64,
    apr_percent: f64,
    created_at: DateTime<Utc>,
    last_claim_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let from = last_claim_at.unwrap_or(created_at);
    let elapsed = (now - from).num_milliseconds() as f64 / 1000.0;
    accrued(principal, apr_percent, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn zero_elapsed_accrues_nothing() {
        assert_eq!(accrued(1000.0, 12.0, 0.0), 0.0);
    }

    #[test]
    fn full_year_at_apr_yields_apr_fraction() {
        let earned = accrued(1000.0, 12.0, SECONDS_PER_YEAR);
        assert!((earned - 120.0).abs() < 1e-9);
    }

    #[test]
    fn accrual_is_monotonic_in_elapsed_time() {
        let mut prev = 0.0;
        for secs in [0.0, 1.0, 60.0, 3600.0, 86_400.0, SECONDS_PER_YEAR] {
            let v = accrued(500.0, 8.0, secs);
            assert!(v >= prev, "accrual went backwards at {secs}s");
            prev = v;
        }
    }

    #[test]
    fn negative_elapsed_clamps_to_zero() {
        assert_eq!(accrued(1000.0, 12.0, -50.0), 0.0);

        let now = Utc::now();
        let future = now + Duration::hours(1);
        assert_eq!(accrued_since(1000.0, 12.0, future, None, now), 0.0);
    }

    #[test]
    fn checkpoint_prefers_last_claim_over_created_at() {
        let now = Utc::now();
        let created = now - Duration::days(365);
        let claimed = now - Duration::hours(1);

        let since_claim = accrued_since(1000.0, 12.0, created, Some(claimed), now);
        let since_start = accrued_since(1000.0, 12.0, created, None, now);
        assert!(since_claim < since_start);
        assert!((since_claim - accrued(1000.0, 12.0, 3600.0)).abs() < 1e-6);
    }
}
