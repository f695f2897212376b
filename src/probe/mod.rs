//! Reachability probing
//!
//! A probe round sends a handful of echo requests from this node's internal
//! address to a peer's internal address and reduces the replies to an
//! average RTT and a loss fraction. Silence from the peer is a measurement
//! (full loss), not an error; [`ProbeError`] is reserved for failures of the
//! probing machinery itself.

pub mod ping;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;

pub use ping::PingProber;

/// Result of one probe round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Mean RTT of the answered probes, zero when none were answered
    pub latency: Duration,
    /// Fraction of probes left unanswered, 0.0..=1.0
    pub loss: f64,
}

impl Measurement {
    pub fn unreachable() -> Self {
        Self {
            latency: Duration::ZERO,
            loss: 1.0,
        }
    }

    /// Reduce a round of `sent` probes, `received` replies averaging `avg`
    pub fn from_counts(sent: u32, received: u32, avg: Option<Duration>) -> Self {
        match avg {
            Some(avg) if sent > 0 && received > 0 => Self {
                latency: avg,
                loss: 1.0 - received.min(sent) as f64 / sent as f64,
            },
            _ => Self::unreachable(),
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, src: IpAddr, dst: IpAddr) -> Result<Measurement, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_replies_is_full_loss() {
        let m = Measurement::from_counts(3, 0, None);
        assert_eq!(m, Measurement::unreachable());
        assert_eq!(m.latency, Duration::ZERO);
    }

    #[test]
    fn test_partial_replies() {
        let m = Measurement::from_counts(3, 2, Some(Duration::from_millis(15)));
        assert_eq!(m.latency, Duration::from_millis(15));
        assert!((m.loss - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_answered_is_zero_loss() {
        let m = Measurement::from_counts(2, 2, Some(Duration::from_millis(4)));
        assert_eq!(m.loss, 0.0);
    }

    #[test]
    fn test_nothing_sent_is_unreachable() {
        assert_eq!(
            Measurement::from_counts(0, 0, Some(Duration::from_millis(1))),
            Measurement::unreachable()
        );
    }
}
