use std::{sync::Arc, time::Duration};

use sluice::{
    PipelineCoordinator, SinkConfiguration,
    blob_store::ObjectStoreBackend,
    messages::{Header, Record, TopicPartition},
    offsets::InMemoryOffsetCommitter,
};
use tracing_subscriber::EnvFilter;

const TOPIC: &str = "example-topic";
const PARTITIONS: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SinkConfiguration::from_json(&std::fs::read_to_string(path)?)?,
        None => SinkConfiguration {
            max_records_per_batch: Some(100),
            flush_interval_in_ms: 500,
            ..Default::default()
        },
    };

    let mut data = std::env::current_dir()?;
    data.push("data");
    std::fs::create_dir_all(&data)?;

    let store = Arc::new(ObjectStoreBackend::new(Arc::new(
        object_store::local::LocalFileSystem::new_with_prefix(&data)?,
    )));

    let coordinator = Arc::new(PipelineCoordinator::new(
        config,
        store,
        Arc::new(InMemoryOffsetCommitter::new()),
    )?);

    let partitions = (0..PARTITIONS)
        .map(|partition| TopicPartition::new(TOPIC, partition))
        .collect::<Vec<_>>();

    coordinator
        .on_partitions_assigned(partitions.iter().cloned())
        .await?;

    let ticker = coordinator.spawn_ticker(Duration::from_millis(100));

    for partition in &partitions {
        let start = coordinator
            .committed_watermark(partition)
            .await
            .unwrap_or_default();

        for offset in start..start + 250 {
            let record = Record::new(
                TOPIC,
                partition.partition(),
                offset,
                chrono::Utc::now().timestamp_millis(),
                format!("record {offset}"),
            )
            .with_key(format!("key-{}", offset % 10))
            .with_header(Header::new("producer", "demo"));

            coordinator.on_record(record).await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    ticker.abort();

    for released in coordinator.shutdown().await? {
        tracing::info!("{:?}", released);
    }

    tracing::info!("Objects written under {}.", data.display());

    Ok(())
}
