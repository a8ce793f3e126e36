//! Pure batch arithmetic.

use chrono::{DateTime, Utc};

use crate::model::PointBatch;

/// Sum of points in batches still valid at `now`.
pub fn valid_balance(batches: &[PointBatch], now: DateTime<Utc>) -> u64 {
    batches
        .iter()
        .filter(|b| b.is_valid_at(now))
        .map(|b| b.points)
        .sum()
}

/// Drop batches whose expiry is at or before `now`.
pub fn sweep_expired(batches: Vec<PointBatch>, now: DateTime<Utc>) -> Vec<PointBatch> {
    batches.into_iter().filter(|b| b.is_valid_at(now)).collect()
}

/// Valid balance was below the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub available: u64,
}

/// Deduct `points` from the oldest valid batches first.
///
/// The result is ordered by `earned_at` whatever the input order. Expired
/// batches pass through unchanged; valid batches are removed when fully
/// consumed, reduced when partially consumed, and untouched once the
/// amount is covered. Nothing is deducted when the balance is short.
pub fn consume_fifo(
    batches: &[PointBatch],
    points: u64,
    now: DateTime<Utc>,
) -> Result<Vec<PointBatch>, Shortfall> {
    let available = valid_balance(batches, now);
    if available < points {
        return Err(Shortfall { available });
    }

    let mut ordered = batches.to_vec();
    ordered.sort_by_key(|b| b.earned_at);

    let mut remaining = points;
    let mut result = Vec::with_capacity(ordered.len());
    for batch in ordered {
        if !batch.is_valid_at(now) || remaining == 0 {
            result.push(batch);
        } else if batch.points <= remaining {
            remaining -= batch.points;
        } else {
            result.push(PointBatch {
                points: batch.points - remaining,
                ..batch
            });
            remaining = 0;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn batch(points: u64, earned_offset_days: i64, expires_in_days: i64) -> PointBatch {
        let earned_at = base() + Duration::days(earned_offset_days);
        PointBatch {
            points,
            earned_at,
            expires_at: earned_at + Duration::days(expires_in_days),
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_valid_balance_excludes_expired() {
        let now = base() + Duration::days(10);
        let batches = vec![batch(100, 0, 5), batch(40, 1, 60), batch(2, 2, 60)];
        assert_eq!(valid_balance(&batches, now), 42);
    }

    #[test]
    fn test_batch_expiring_exactly_now_is_excluded() {
        let batches = vec![batch(10, 0, 1)];
        assert_eq!(valid_balance(&batches, base() + Duration::days(1)), 0);
    }

    #[test]
    fn test_sweep_drops_expired() {
        let now = base() + Duration::days(10);
        let swept = sweep_expired(vec![batch(1, 0, 5), batch(2, 0, 60)], now);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].points, 2);
    }

    #[test]
    fn test_fifo_partial_consumption() {
        let now = base() + Duration::days(3);
        let batches = vec![batch(100, 0, 60), batch(50, 1, 60), batch(80, 2, 60)];

        let result = consume_fifo(&batches, 120, now).unwrap();

        assert_eq!(result, vec![batch(30, 1, 60), batch(80, 2, 60)]);
    }

    #[test]
    fn test_fifo_is_independent_of_input_order() {
        let now = base() + Duration::days(3);
        let shuffled = vec![batch(80, 2, 60), batch(100, 0, 60), batch(50, 1, 60)];

        let result = consume_fifo(&shuffled, 120, now).unwrap();

        assert_eq!(result, vec![batch(30, 1, 60), batch(80, 2, 60)]);
    }

    #[test]
    fn test_fifo_skips_and_preserves_expired() {
        let now = base() + Duration::days(10);
        let expired = batch(500, 0, 5);
        let batches = vec![expired.clone(), batch(20, 1, 60), batch(30, 2, 60)];

        let result = consume_fifo(&batches, 25, now).unwrap();

        assert_eq!(result, vec![expired, batch(25, 2, 60)]);
    }

    #[test]
    fn test_fifo_exact_amount_consumes_everything_valid() {
        let now = base();
        let result = consume_fifo(&[batch(10, 0, 60), batch(20, 0, 60)], 30, now).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_fifo_shortfall_reports_valid_balance() {
        let now = base() + Duration::days(10);
        let batches = vec![batch(500, 0, 5), batch(20, 1, 60)];
        assert_eq!(
            consume_fifo(&batches, 100, now),
            Err(Shortfall { available: 20 })
        );
    }
}
