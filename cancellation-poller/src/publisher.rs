use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::kafka_producer::KafkaContext;
use crate::metrics_constants::*;
use crate::proto::{self, DVJ_ID_HEADER, PROTOBUF_SCHEMA_HEADER, TRIP_CANCELLATION_SCHEMA};
use crate::record::CancellationRecord;

#[derive(Error, Debug)]
pub enum PublishError {
    /// The bus client failed, the poller must stop.
    #[error("failed to produce to kafka: {0}")]
    Connection(KafkaError),
    #[error("failed to produce to kafka (timeout)")]
    Canceled,
    /// Only this record was rejected, the rest of the batch can go on.
    #[error("record rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PublishError::Rejected(_))
    }
}

/// Outcome of publishing one cycle's resolved records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub published: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait CancellationSink {
    /// Publish one record, waiting for the bus to acknowledge it.
    async fn send(&self, record: &CancellationRecord) -> Result<(), PublishError>;

    /// Flush anything still buffered, called once when the poller stops.
    async fn close(&self);
}

/// Publish `records` one after the other. A rejected record is logged and skipped, any
/// other error stops the batch and is returned.
pub async fn publish_all<S>(
    sink: &S,
    records: &[CancellationRecord],
) -> Result<PublishOutcome, PublishError>
where
    S: CancellationSink + ?Sized,
{
    let mut outcome = PublishOutcome::default();

    for record in records {
        match sink.send(record).await {
            Ok(()) => {
                outcome.published += 1;
                debug!(
                    trip_id = %record.trip_id,
                    deviation_case_id = %record.deviation_case_id,
                    status = ?record.status,
                    "produced cancellation for trip {}",
                    record.describe()
                );
            }
            Err(err) if err.is_fatal() => {
                error!(trip_id = %record.trip_id, "failed to send message to kafka: {}", err);
                return Err(err);
            }
            Err(err) => {
                outcome.skipped += 1;
                metrics::counter!(EVENTS_DROPPED).increment(1);
                error!(
                    trip_id = %record.trip_id,
                    deviation_case_id = %record.deviation_case_id,
                    "failed to handle cancellation message: {}",
                    err
                );
            }
        }
    }

    metrics::counter!(EVENTS_PUBLISHED).increment(outcome.published as u64);
    Ok(outcome)
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

fn headers(record: &CancellationRecord) -> OwnedHeaders {
    OwnedHeaders::new()
        .insert(Header {
            key: PROTOBUF_SCHEMA_HEADER,
            value: Some(TRIP_CANCELLATION_SCHEMA),
        })
        .insert(Header {
            key: DVJ_ID_HEADER,
            value: Some(record.trip_id.as_str()),
        })
}

fn classify(error: KafkaError) -> PublishError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge) => {
            PublishError::Rejected(error.to_string())
        }
        error => PublishError::Connection(error),
    }
}

#[async_trait]
impl CancellationSink for KafkaPublisher {
    #[instrument(skip_all, fields(trip_id = %record.trip_id))]
    async fn send(&self, record: &CancellationRecord) -> Result<(), PublishError> {
        let payload = proto::encode(record);

        let delivery = self
            .producer
            .send_result(
                FutureRecord::to(&self.topic)
                    .key(&record.trip_id)
                    .payload(&payload)
                    .timestamp(record.last_modified_epoch_ms)
                    .headers(headers(record)),
            )
            .map_err(|(error, _)| classify(error))?;

        match delivery.await {
            // Cancelled due to timeout while retrying
            Err(_) => Err(PublishError::Canceled),
            Ok(Err((error, _))) => Err(classify(error)),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn close(&self) {
        info!("flushing kafka producer");
        if let Err(err) = self.producer.flush(Duration::from_secs(30)) {
            error!("failed to flush kafka producer: {}", err);
        }
    }
}
