use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;
use crate::metrics_constants::*;

const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        metrics::gauge!(KAFKA_QUEUE_DEPTH).set(stats.msg_cnt as f64);
        metrics::gauge!(KAFKA_QUEUE_BYTES).set(stats.msg_size as f64);
        for (_, broker) in stats.brokers {
            metrics::counter!(KAFKA_BROKER_TX_ERRORS, "broker" => broker.nodeid.to_string())
                .absolute(broker.txerrs);
        }
    }
}

/// Producer settings. The stats interval also paces the liveness reports of `KafkaContext`.
fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set("message.timeout.ms", config.kafka_message_timeout_ms.to_string())
        .set("compression.codec", &config.kafka_compression_codec)
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }
    client_config
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let client_config = client_config(config);
    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext::from(liveness))?;

    // Fail at startup rather than on the first publish if the brokers are unreachable
    let metadata = producer
        .client()
        .fetch_metadata(None, METADATA_TIMEOUT)
        .map_err(|error| {
            error!("failed to fetch metadata from kafka brokers: {}", error);
            error
        })?;

    let topic_known = metadata
        .topics()
        .iter()
        .any(|topic| topic.name() == config.kafka_topic);
    if topic_known {
        info!(topic = %config.kafka_topic, "connected to kafka brokers");
    } else {
        warn!(
            topic = %config.kafka_topic,
            "connected to kafka brokers, but the topic doesn't exist yet"
        );
    }

    Ok(producer)
}
