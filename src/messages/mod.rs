//! General data structures flowing through the pipeline.

mod flush_outcome;
mod record;
mod topic_partition;

pub use flush_outcome::*;
pub use record::*;
pub use topic_partition::*;
