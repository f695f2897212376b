//! Candidate policy
//!
//! A peer is a candidate when its latest sample has latency at or below the
//! latency threshold and loss strictly below the loss threshold. The
//! asymmetry is deliberate: a lossless peer sitting exactly on the latency
//! threshold still qualifies.

use std::cmp::Ordering;
use std::time::Duration;

use crate::health::PeerSample;
use crate::peer::PeerId;

/// Candidate admission thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub latency: Duration,
    pub loss: f64,
}

pub fn is_candidate(sample: &PeerSample, thresholds: &Thresholds) -> bool {
    sample.latency <= thresholds.latency && sample.loss < thresholds.loss
}

/// A peer admitted by [`is_candidate`], with the sample that admitted it
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: PeerId,
    pub name: String,
    pub sample: PeerSample,
}

/// Total order used to rank candidates: lower latency first, then lower ID
pub fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.sample
        .latency
        .cmp(&b.sample.latency)
        .then_with(|| a.id.cmp(&b.id))
}

/// Best candidate, or `None` for an empty set
pub fn closest<'a, I>(candidates: I) -> Option<&'a Candidate>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates.into_iter().min_by(|a, b| rank(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(latency_ms: u64, loss: f64) -> PeerSample {
        PeerSample {
            latency: Duration::from_millis(latency_ms),
            loss,
            tick: 1,
            measured_at: Utc::now(),
        }
    }

    fn candidate(id: u8, name: &str, latency_ms: u64) -> Candidate {
        Candidate {
            id: PeerId(id),
            name: name.into(),
            sample: sample(latency_ms, 0.0),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            latency: Duration::from_millis(100),
            loss: 0.1,
        }
    }

    #[test]
    fn test_latency_threshold_is_inclusive() {
        assert!(is_candidate(&sample(100, 0.0), &thresholds()));
        assert!(!is_candidate(&sample(101, 0.0), &thresholds()));
    }

    #[test]
    fn test_loss_threshold_is_strict() {
        assert!(is_candidate(&sample(10, 0.09), &thresholds()));
        assert!(!is_candidate(&sample(10, 0.1), &thresholds()));
    }

    #[test]
    fn test_total_loss_is_never_a_candidate() {
        // Unreachable peers are reported as zero latency, full loss
        assert!(!is_candidate(&sample(0, 1.0), &thresholds()));
    }

    #[test]
    fn test_monotonic_in_latency_and_loss() {
        let t = thresholds();
        let latencies: Vec<u64> = (0..=300).step_by(5).collect();
        let losses: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();

        for &loss in &losses {
            let mut admitted = true;
            for &lat in &latencies {
                let now = is_candidate(&sample(lat, loss), &t);
                assert!(!(now && !admitted), "re-admitted at {}ms loss {}", lat, loss);
                admitted = now;
            }
        }
        for &lat in &latencies {
            let mut admitted = true;
            for &loss in &losses {
                let now = is_candidate(&sample(lat, loss), &t);
                assert!(!(now && !admitted), "re-admitted at loss {} {}ms", loss, lat);
                admitted = now;
            }
        }
    }

    #[test]
    fn test_closest_of_empty_set() {
        let none: Vec<Candidate> = Vec::new();
        assert!(closest(&none).is_none());
    }

    #[test]
    fn test_closest_breaks_ties_by_lowest_id() {
        let set = vec![
            candidate(1, "a", 10),
            candidate(5, "c", 5),
            candidate(3, "b", 5),
        ];
        assert_eq!(closest(&set).unwrap().name, "b");

        let reversed: Vec<_> = set.iter().rev().cloned().collect();
        assert_eq!(closest(&reversed).unwrap().name, "b");
    }

    #[test]
    fn test_rank_orders_by_latency_first() {
        let fast = candidate(9, "fast", 1);
        let slow = candidate(1, "slow", 2);
        assert_eq!(rank(&fast, &slow), Ordering::Less);
    }
}
