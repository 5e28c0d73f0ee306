// Engine orchestration: request coordination, in-flight dedup and background prefetch.

pub mod coordinator;
pub mod inflight;
pub mod scheduler;
pub mod service;
pub mod stats;
