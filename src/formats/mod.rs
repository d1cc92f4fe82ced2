//! File format readers

pub mod delimited;
pub mod reader;

pub use delimited::reader::ChunkReader;
pub use reader::{DelimitedConfig, Field, RowChunk};
