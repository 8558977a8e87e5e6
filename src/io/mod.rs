pub mod sam;
pub mod summary;
pub mod writer;

pub use sam::SamWriter;
pub use summary::SummaryWriter;
pub use writer::{MultiWriter, ResultWriter, SequenceWriter};
