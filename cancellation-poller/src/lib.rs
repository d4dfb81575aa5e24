//! Poll the deviation case database for trip cancellations and publish them to Kafka.
pub mod churn;
pub mod config;
pub mod handlers;
pub mod health;
pub mod kafka_producer;
pub mod metrics_constants;
pub mod parser;
pub mod poller;
pub mod proto;
pub mod publisher;
pub mod record;
pub mod resolve;
pub mod source;
pub mod time;
