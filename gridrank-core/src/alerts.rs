// Rank movement alerts

use crate::model::{AlertKind, NewAlert};
use gridrank_scanner::GeoPoint;
use std::collections::HashMap;

pub const DEFAULT_ALERT_THRESHOLD: u32 = 3;

/// A successful probe of one grid point in the current run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub grid_index: i64,
    pub point: GeoPoint,
    pub rank: Option<u32>,
}

/// Decides whether a change from `previous` to the current observation is notable.
pub trait AlertPolicy: Send + Sync {
    fn evaluate(&self, previous: Option<u32>, current: &Observation) -> Option<NewAlert>;
}

/// Alerts on visibility changes and on rank moves of at least `threshold` places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    threshold: u32,
}

impl ThresholdPolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}

impl AlertPolicy for ThresholdPolicy {
    fn evaluate(&self, previous: Option<u32>, current: &Observation) -> Option<NewAlert> {
        let at = current.point;
        let (kind, message) = match (previous, current.rank) {
            (Some(before), Some(now)) if now >= before.saturating_add(self.threshold) => (
                AlertKind::RankDrop,
                format!("Rank dropped from #{} to #{} at {}", before, now, at),
            ),
            (Some(before), Some(now)) if before >= now.saturating_add(self.threshold) => (
                AlertKind::RankGain,
                format!("Rank improved from #{} to #{} at {}", before, now, at),
            ),
            (Some(before), None) => (
                AlertKind::LostVisibility,
                format!("No longer listed at {} (was #{})", at, before),
            ),
            (None, Some(now)) => (
                AlertKind::NewVisibility,
                format!("Now listed at #{} at {}", now, at),
            ),
            _ => return None,
        };

        Some(NewAlert {
            grid_index: current.grid_index,
            kind,
            message,
            previous_rank: previous,
            current_rank: current.rank,
        })
    }
}

/// Evaluate every observation that has a baseline in `history`.
pub fn evaluate_all(
    policy: &dyn AlertPolicy,
    history: &HashMap<i64, Option<u32>>,
    observations: &[Observation],
) -> Vec<NewAlert> {
    observations
        .iter()
        .filter_map(|obs| {
            let previous = history.get(&obs.grid_index)?;
            policy.evaluate(*previous, obs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(grid_index: i64, rank: Option<u32>) -> Observation {
        Observation {
            grid_index,
            point: GeoPoint::new(41.8781, -87.6298),
            rank,
        }
    }

    #[test]
    fn test_threshold_policy() {
        let policy = ThresholdPolicy::default();

        let drop = policy.evaluate(Some(2), &observation(0, Some(5))).unwrap();
        assert_eq!(drop.kind, AlertKind::RankDrop);
        assert_eq!(drop.previous_rank, Some(2));
        assert_eq!(drop.current_rank, Some(5));

        let gain = policy.evaluate(Some(9), &observation(0, Some(1))).unwrap();
        assert_eq!(gain.kind, AlertKind::RankGain);

        assert!(policy.evaluate(Some(2), &observation(0, Some(4))).is_none());
        assert!(policy.evaluate(Some(4), &observation(0, Some(2))).is_none());
        assert!(policy.evaluate(None, &observation(0, None)).is_none());
    }

    #[test]
    fn test_visibility_changes() {
        let policy = ThresholdPolicy::new(10);

        let lost = policy.evaluate(Some(1), &observation(3, None)).unwrap();
        assert_eq!(lost.kind, AlertKind::LostVisibility);
        assert_eq!(lost.grid_index, 3);

        let found = policy.evaluate(None, &observation(3, Some(20))).unwrap();
        assert_eq!(found.kind, AlertKind::NewVisibility);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let policy = ThresholdPolicy::new(0);
        assert_eq!(policy.threshold(), 1);
        assert!(policy.evaluate(Some(3), &observation(0, Some(3))).is_none());
    }

    #[test]
    fn test_evaluate_all_needs_a_baseline() {
        let policy = ThresholdPolicy::default();
        let history = HashMap::from([(0, Some(1)), (1, None)]);
        let observations = vec![
            observation(0, Some(8)),
            observation(1, Some(2)),
            observation(2, Some(1)),
        ];

        let alerts = evaluate_all(&policy, &history, &observations);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::RankDrop, AlertKind::NewVisibility]);
    }
}
