//! StatsRing: per-target second-resolution circular counter over a
//! 3,600-second window, with sliding-window aggregates (§4.7).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::Timelike;
use serde::Serialize;

const RING_SIZE: usize = 3600;

struct Ring {
    counter: [u32; RING_SIZE],
    cell_visit: [bool; RING_SIZE],
}

impl Ring {
    fn new() -> Self {
        Ring { counter: [0; RING_SIZE], cell_visit: [false; RING_SIZE] }
    }

    /// Record one hit at second-of-hour `s`.
    fn tick(&mut self, s: usize) {
        if s == 0 && self.cell_visit[0] {
            self.counter = [0; RING_SIZE];
            self.cell_visit = [false; RING_SIZE];
            self.counter[0] = 1;
            self.cell_visit[0] = true;
            return;
        }
        if !self.cell_visit[s] {
            self.cell_visit[s] = true;
            self.counter[s] = 1;
        } else {
            self.counter[s] = self.counter[s].saturating_add(1);
        }
    }

    /// Sum of the last `n` slots ending at (and including) second `s`.
    fn rolling_sum(&self, s: usize, n: usize) -> u64 {
        let n = n.min(RING_SIZE);
        (0..n)
            .map(|i| self.counter[(s + RING_SIZE - i) % RING_SIZE] as u64)
            .sum()
    }

    /// Counters rotated so the most recent slot (`s`) is last.
    fn rotated(&self, s: usize) -> Vec<u32> {
        let mut out = Vec::with_capacity(RING_SIZE);
        out.extend_from_slice(&self.counter[s + 1..]);
        out.extend_from_slice(&self.counter[..=s]);
        out
    }
}

/// A readout of one target's ring: rotated raw counters plus the
/// standard rolling-window aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub counters: Vec<u32>,
    pub last_1s: u64,
    pub last_1m: u64,
    pub last_5m: u64,
    pub last_15m: u64,
    pub last_30m: u64,
    pub last_1h: u64,
}

/// A named family of per-target rings (one `StatsRing` per metric: http,
/// ws, error).
pub struct StatsRing {
    rings: RwLock<HashMap<String, Mutex<Ring>>>,
}

impl Default for StatsRing {
    fn default() -> Self {
        Self::new()
    }
}

fn second_of_hour_now() -> usize {
    let now = chrono::Utc::now();
    (now.minute() * 60 + now.second()) as usize
}

impl StatsRing {
    pub fn new() -> Self {
        StatsRing { rings: RwLock::new(HashMap::new()) }
    }

    pub fn log(&self, target: &str) {
        self.tick(target, second_of_hour_now());
    }

    fn tick(&self, target: &str, s: usize) {
        {
            let rings = self.rings.read().expect("stats lock poisoned");
            if let Some(ring) = rings.get(target) {
                ring.lock().expect("ring lock poisoned").tick(s);
                return;
            }
        }
        let mut rings = self.rings.write().expect("stats lock poisoned");
        rings.entry(target.to_string()).or_insert_with(|| Mutex::new(Ring::new())).lock().unwrap().tick(s);
    }

    pub fn snapshot(&self, target: &str) -> Option<StatsSnapshot> {
        self.snapshot_at(target, second_of_hour_now())
    }

    fn snapshot_at(&self, target: &str, s: usize) -> Option<StatsSnapshot> {
        let rings = self.rings.read().expect("stats lock poisoned");
        let ring = rings.get(target)?.lock().expect("ring lock poisoned");
        Some(StatsSnapshot {
            counters: ring.rotated(s),
            last_1s: ring.rolling_sum(s, 1),
            last_1m: ring.rolling_sum(s, 60),
            last_5m: ring.rolling_sum(s, 300),
            last_15m: ring.rolling_sum(s, 900),
            last_30m: ring.rolling_sum(s, 1800),
            last_1h: ring.rolling_sum(s, 3600),
        })
    }

    pub fn targets(&self) -> Vec<String> {
        let rings = self.rings.read().expect("stats lock poisoned");
        rings.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_hits_in_one_second_sum_to_n() {
        let rings = StatsRing::new();
        for _ in 0..7 {
            rings.tick("svc", 10);
        }
        let snap = rings.snapshot_at("svc", 10).unwrap();
        assert_eq!(snap.last_1s, 7);
    }

    #[test]
    fn full_hour_aggregate_sums_all_per_second_counts() {
        let rings = StatsRing::new();
        let mut expected = 0u64;
        for s in 0..RING_SIZE {
            let hits = (s % 3) as u64 + 1;
            for _ in 0..hits {
                rings.tick("svc", s);
            }
            expected += hits;
        }
        let snap = rings.snapshot_at("svc", RING_SIZE - 1).unwrap();
        assert_eq!(snap.last_1h, expected);
    }

    #[test]
    fn wrap_resets_ring_once() {
        let rings = StatsRing::new();
        rings.tick("svc", 0);
        for s in 1..RING_SIZE {
            rings.tick("svc", s);
        }
        // back to slot 0: this is the wrap
        rings.tick("svc", 0);
        let snap = rings.snapshot_at("svc", 0).unwrap();
        assert_eq!(snap.last_1h, 1);
    }

    #[test]
    fn rotated_places_current_slot_last() {
        let rings = StatsRing::new();
        rings.tick("svc", 2);
        let snap = rings.snapshot_at("svc", 2).unwrap();
        assert_eq!(*snap.counters.last().unwrap(), 1);
    }

    #[test]
    fn unknown_target_has_no_snapshot() {
        let rings = StatsRing::new();
        assert!(rings.snapshot("missing").is_none());
    }
}
