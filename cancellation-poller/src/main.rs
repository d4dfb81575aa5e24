use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cancellation_poller::config::Config;
use cancellation_poller::handlers::{app, listen, setup_metrics_recorder};
use cancellation_poller::health::HealthRegistry;
use cancellation_poller::kafka_producer::create_kafka_producer;
use cancellation_poller::poller::Poller;
use cancellation_poller::publisher::KafkaPublisher;
use cancellation_poller::source::PgCancellationSource;

async fn shutdown(mut term: Signal, mut interrupt: Signal) {
    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    let mode = config.source_mode()?;
    let interval = config.poll_interval()?;
    let zone = config.timezone.0;

    let term = signal(SignalKind::terminate()).wrap_err("failed to register SIGTERM handler")?;
    let interrupt =
        signal(SignalKind::interrupt()).wrap_err("failed to register SIGINT handler")?;

    let connection_string = config.connection_string()?;
    let source = PgCancellationSource::new(&connection_string, config.pg_max_connections)
        .await
        .wrap_err("failed to connect to the database")?;
    info!("connected to the database");

    let liveness = HealthRegistry::new();
    let kafka_liveness = liveness.register("rdkafka", chrono::Duration::seconds(30));
    let producer = create_kafka_producer(&config.kafka, kafka_liveness)
        .await
        .wrap_err("failed to create kafka producer")?;
    let publisher = KafkaPublisher::new(producer, config.kafka.kafka_topic.clone());

    let recorder_handle = setup_metrics_recorder()?;
    let http_server = tokio::spawn(listen(
        app(liveness.clone(), Some(recorder_handle)),
        config.bind(),
    ));

    let mut poller = Poller::new(source, publisher, mode, zone, interval, liveness);
    info!(
        "polling cancellations every {:?}, mode {:?}, time zone {}",
        interval, mode, zone
    );

    let result = poller.run(shutdown(term, interrupt)).await;

    http_server.abort();
    if let Err(e) = &result {
        error!("poller exited with: {}", e);
    }
    result?;
    info!("exiting");

    Ok(())
}
