//! Peer health table
//!
//! Holds the latest latency/loss sample per peer and the candidate set
//! derived from it. The probe loop is the only writer; every write builds a
//! fresh immutable [`HealthSnapshot`] and swaps it in, so readers always see
//! one complete tick and can rank candidates without the table moving under
//! them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::peer::{Peer, PeerId};
use crate::policy::{self, Candidate, Thresholds};
use crate::probe::Measurement;

/// A sample older than this many ticks is not eligible for candidacy
pub const MAX_SAMPLE_AGE_TICKS: u64 = 1;

/// Last measurement of one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSample {
    pub latency: Duration,
    pub loss: f64,
    /// Probe tick that produced this sample
    pub tick: u64,
    pub measured_at: DateTime<Utc>,
}

/// Immutable view of the table at the end of one write
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    tick: u64,
    samples: BTreeMap<PeerId, PeerSample>,
    /// Sorted by [`policy::rank`]
    candidates: Vec<Candidate>,
}

impl HealthSnapshot {
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sample(&self, id: PeerId) -> Option<&PeerSample> {
        self.samples.get(&id)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn is_candidate(&self, id: PeerId) -> bool {
        self.candidates.iter().any(|c| c.id == id)
    }

    pub fn closest(&self) -> Option<&Candidate> {
        policy::closest(&self.candidates)
    }
}

/// Shared health table, single writer / many readers
pub struct PeerHealthTable {
    /// Probed peers, ordered by ID
    peers: Vec<(PeerId, String)>,
    thresholds: Thresholds,
    current: ArcSwap<HealthSnapshot>,
    writer: Mutex<()>,
}

impl PeerHealthTable {
    pub fn new(peers: &[Peer], thresholds: Thresholds) -> Self {
        let mut peers: Vec<_> = peers.iter().map(|p| (p.id, p.name.clone())).collect();
        peers.sort();
        Self {
            peers,
            thresholds,
            current: ArcSwap::from_pointee(HealthSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Consistent view of samples and candidates
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.current.load_full()
    }

    /// Publish the results of probe tick `tick`.
    ///
    /// Peers missing from `measurements` keep their previous sample; the
    /// candidate set is recomputed for every peer so that samples which have
    /// aged past [`MAX_SAMPLE_AGE_TICKS`] drop out.
    pub fn apply_tick<I>(&self, tick: u64, measurements: I) -> Arc<HealthSnapshot>
    where
        I: IntoIterator<Item = (PeerId, Measurement)>,
    {
        let _writer = self.writer.lock();
        let previous = self.current.load();

        let mut samples = previous.samples.clone();
        let measured_at = Utc::now();
        for (id, m) in measurements {
            if !self.peers.iter().any(|(p, _)| *p == id) {
                continue;
            }
            samples.insert(
                id,
                PeerSample {
                    latency: m.latency,
                    loss: m.loss,
                    tick,
                    measured_at,
                },
            );
        }

        let mut candidates: Vec<Candidate> = self
            .peers
            .iter()
            .filter_map(|(id, name)| {
                let sample = samples.get(id)?;
                let fresh = tick.saturating_sub(sample.tick) <= MAX_SAMPLE_AGE_TICKS;
                (fresh && policy::is_candidate(sample, &self.thresholds)).then(|| Candidate {
                    id: *id,
                    name: name.clone(),
                    sample: sample.clone(),
                })
            })
            .collect();
        candidates.sort_by(policy::rank);

        let next = Arc::new(HealthSnapshot {
            tick: tick.max(previous.tick),
            samples,
            candidates,
        });
        self.current.store(next.clone());
        next
    }
}
