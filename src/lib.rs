//! Generation cache and concurrency coordinator.
//!
//! Expensive generated content (narration audio, streamed insights) is
//! served from a class-partitioned, expiring [`store::ContentStore`];
//! misses go through the [`engine::coordinator::Coordinator`], which
//! guarantees at most one generation per key, and the
//! [`engine::scheduler::PrefetchScheduler`] warms the cache in the
//! background for the item being browsed.

pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod store;
pub mod stream;

pub use config::EngineConfig;
pub use engine::coordinator::{Coordinator, WaitPolicy};
pub use engine::scheduler::{PrefetchHandler, PrefetchScheduler};
pub use engine::service::GenerationService;
pub use error::GenerationError;
pub use model::{CacheRecord, ContentClass, ContentId, Generated, Payload, PoemRecord};
