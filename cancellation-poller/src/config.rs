use std::str::FromStr;
use std::time;

use chrono_tz::Tz;
use envconfig::Envconfig;
use thiserror::Error;

use crate::poller::SourceMode;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3304")]
    pub port: u16,

    // If unset, the connection string is read from `filepath_connection_string`, which is where
    // docker secrets are mounted by default.
    pub database_url: Option<String>,

    #[envconfig(default = "/run/secrets/db_conn_string")]
    pub filepath_connection_string: String,

    #[envconfig(default = "2")]
    pub pg_max_connections: u32,

    #[envconfig(default = "30")]
    pub poll_interval_secs: u64,

    #[envconfig(default = "Europe/Helsinki")]
    pub timezone: TimeZoneName,

    // NOW for ongoing and future cancellations, HISTORY (or PAST) to also include the ones
    // created and retracted within a single poll interval. Validated at startup.
    pub cancellations_from_time: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "trip_cancellations")]
    pub kafka_topic: String,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CANCELLATIONS_FROM_TIME must be NOW, HISTORY or PAST, got {0:?}")]
    InvalidSourceMode(String),
    #[error("failed to read DB connection string from {path}: {error}")]
    ConnectionStringUnreadable {
        path: String,
        error: std::io::Error,
    },
    #[error("DB connection string is empty")]
    EmptyConnectionString,
    #[error("POLL_INTERVAL_SECS must be greater than zero")]
    InvalidPollInterval,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn source_mode(&self) -> Result<SourceMode, ConfigError> {
        self.cancellations_from_time
            .parse()
            .map_err(|_| ConfigError::InvalidSourceMode(self.cancellations_from_time.clone()))
    }

    pub fn poll_interval(&self) -> Result<time::Duration, ConfigError> {
        match self.poll_interval_secs {
            0 => Err(ConfigError::InvalidPollInterval),
            secs => Ok(time::Duration::from_secs(secs)),
        }
    }

    /// The database connection string, from `DATABASE_URL` or else from the secret file.
    pub fn connection_string(&self) -> Result<String, ConfigError> {
        let connection_string = match &self.database_url {
            Some(url) => url.trim().to_owned(),
            None => std::fs::read_to_string(&self.filepath_connection_string)
                .map_err(|error| ConfigError::ConnectionStringUnreadable {
                    path: self.filepath_connection_string.clone(),
                    error,
                })?
                .trim()
                .to_owned(),
        };

        if connection_string.is_empty() {
            return Err(ConfigError::EmptyConnectionString);
        }
        Ok(connection_string)
    }
}

/// An IANA time zone name, validated when the configuration is loaded.
#[derive(Debug, Clone, Copy)]
pub struct TimeZoneName(pub Tz);

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidTimeZoneError(pub String);

impl std::fmt::Display for InvalidTimeZoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid IANA time zone", self.0)
    }
}

impl FromStr for TimeZoneName {
    type Err = InvalidTimeZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Tz>()
            .map(TimeZoneName)
            .map_err(|_| InvalidTimeZoneError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).expect("valid config")
    }

    #[test]
    fn defaults() {
        let config = config_from(&[("CANCELLATIONS_FROM_TIME", "NOW")]);
        assert_eq!(config.bind(), "0.0.0.0:3304");
        assert_eq!(config.poll_interval().unwrap(), time::Duration::from_secs(30));
        assert_eq!(config.timezone.0, chrono_tz::Europe::Helsinki);
        assert_eq!(config.source_mode().unwrap(), SourceMode::FromNow);
        assert_eq!(config.kafka.kafka_topic, "trip_cancellations");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn source_mode_aliases() {
        for (value, mode) in [
            ("NOW", SourceMode::FromNow),
            ("HISTORY", SourceMode::FromHistory),
            ("PAST", SourceMode::FromHistory),
        ] {
            let config = config_from(&[("CANCELLATIONS_FROM_TIME", value)]);
            assert_eq!(config.source_mode().unwrap(), mode);
        }

        let config = config_from(&[("CANCELLATIONS_FROM_TIME", "yesterday")]);
        assert!(matches!(
            config.source_mode(),
            Err(ConfigError::InvalidSourceMode(v)) if v == "yesterday"
        ));
    }

    #[test]
    fn rejects_bad_time_zone() {
        let env: HashMap<String, String> = [
            ("CANCELLATIONS_FROM_TIME", "NOW"),
            ("TIMEZONE", "Mars/Olympus_Mons"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let config = config_from(&[
            ("CANCELLATIONS_FROM_TIME", "NOW"),
            ("POLL_INTERVAL_SECS", "0"),
        ]);
        assert!(matches!(
            config.poll_interval(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn connection_string_sources() {
        let config = config_from(&[
            ("CANCELLATIONS_FROM_TIME", "NOW"),
            ("DATABASE_URL", " postgres://omm@localhost/omm "),
        ]);
        assert_eq!(
            config.connection_string().unwrap(),
            "postgres://omm@localhost/omm"
        );

        let path = std::env::temp_dir().join(format!("db_conn_string_{}", std::process::id()));
        std::fs::write(&path, "postgres://omm@db/omm\n").unwrap();
        let config = config_from(&[
            ("CANCELLATIONS_FROM_TIME", "NOW"),
            ("FILEPATH_CONNECTION_STRING", path.to_str().unwrap()),
        ]);
        assert_eq!(config.connection_string().unwrap(), "postgres://omm@db/omm");

        std::fs::write(&path, "  \n").unwrap();
        assert!(matches!(
            config.connection_string(),
            Err(ConfigError::EmptyConnectionString)
        ));
        std::fs::remove_file(&path).unwrap();

        let config = config_from(&[
            ("CANCELLATIONS_FROM_TIME", "NOW"),
            ("FILEPATH_CONNECTION_STRING", "/nonexistent/db_conn_string"),
        ]);
        assert!(matches!(
            config.connection_string(),
            Err(ConfigError::ConnectionStringUnreadable { .. })
        ));
    }
}
