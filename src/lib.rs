//! Sluice
//!
//! A sink pipeline that continuously moves ordered, partitioned log records
//! into immutable objects on object storage. Records are buffered per
//! partition, flushed into deterministically named objects once a size, count
//! or age threshold is reached, and only then committed upstream, so a crash
//! at any point either loses nothing or re-uploads an identical object.
//!
//! example usage:
//!
//! ```rust
//! # use std::sync::Arc;
//! # use sluice::{
//! #     PipelineCoordinator, SinkConfiguration,
//! #     blob_store::{BlobStore, ObjectStoreBackend},
//! #     messages::{Record, TopicPartition},
//! #     offsets::InMemoryOffsetCommitter,
//! # };
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SinkConfiguration {
//!     max_records_per_batch: Some(3),
//!     ..Default::default()
//! };
//! let store = Arc::new(ObjectStoreBackend::in_memory());
//! let coordinator = PipelineCoordinator::new(
//!     config,
//!     store.clone(),
//!     Arc::new(InMemoryOffsetCommitter::new()),
//! )?;
//!
//! let partition = TopicPartition::new("example-topic", 0);
//! coordinator.on_partitions_assigned([partition.clone()]).await?;
//!
//! for offset in 10..13 {
//!     coordinator
//!         .on_record(Record::new("example-topic", 0, offset, 0, "hello"))
//!         .await?;
//! }
//!
//! // The third record scheduled an upload; wait for it to land.
//! let flushed = coordinator.wait_for_uploads().await?;
//!
//! assert_eq!(flushed.len(), 1);
//! assert_eq!(coordinator.committed_watermark(&partition).await, Some(13));
//! assert_eq!(store.list("").await?, vec!["example-topic-0-10"]);
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::unwrap_used)]

pub mod backoff;
pub mod batch;
pub mod blob_store;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod messages;
pub mod naming;
pub mod offsets;
pub mod recovery;
pub mod scheduler;
pub mod writer;

pub use config::{RetryConfiguration, SinkConfiguration};
pub use coordinator::PipelineCoordinator;
pub use error::{SluiceError, SluiceResult};
pub use object_store;
