pub mod chunk;
pub mod read;

// Re-export commonly used types
pub use chunk::{chunk_ranges, chunk_read, Chunk};
pub use read::{split_read, Read, ReadGate, SubRead, SubReadTag};
