// Live counters for the coordinator: cache hit rate, generations, dedup waits and timeouts.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub generations_started: u64,
    pub generations_failed: u64,
    pub dedup_waits: u64,
    pub timeouts: u64,
    pub regenerations: u64,
    pub active_generations: u32,
    pub cache_hit_rate: f64,
}

#[derive(Default)]
pub struct StatsCollector {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    generations_started: AtomicU64,
    generations_failed: AtomicU64,
    dedup_waits: AtomicU64,
    timeouts: AtomicU64,
    regenerations: AtomicU64,
    active_generations: AtomicU32,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_wait(&self) {
        self.dedup_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_started(&self) {
        self.generations_started.fetch_add(1, Ordering::Relaxed);
        self.active_generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_finished(&self, ok: bool) {
        self.active_generations.fetch_sub(1, Ordering::Relaxed);
        if !ok {
            self.generations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn generations_started(&self) -> u64 {
        self.generations_started.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let cache_hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        StatsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            generations_started: self.generations_started.load(Ordering::Relaxed),
            generations_failed: self.generations_failed.load(Ordering::Relaxed),
            dedup_waits: self.dedup_waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            active_generations: self.active_generations.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }
}
