// Process-level entry points for embedding the engine.

pub mod simple;

pub use simple::init_logging;
