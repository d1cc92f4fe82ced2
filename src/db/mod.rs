//! Database layer - connection pooling, destination schema lookup and chunk appends

pub mod appender;
pub mod pool;
pub mod schema;

pub use appender::{ChunkSink, DbAppender};
pub use pool::Pool;
