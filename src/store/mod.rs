// Content store: class-partitioned, expiry-aware cache over a pluggable backend.

pub mod backend;
pub mod clock;
pub mod content_store;

pub use backend::{FsBackend, MemoryBackend, StoreBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content_store::ContentStore;
