// Streaming assembly of incremental generator responses.

pub mod assembler;

pub use assembler::{InsightAssembler, StreamAccumulator};
