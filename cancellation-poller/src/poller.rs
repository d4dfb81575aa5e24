use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::churn::{ChurnStats, ChurnTracker};
use crate::health::{HealthHandle, HealthRegistry, PollerState};
use crate::metrics_constants::*;
use crate::parser::parse_rows;
use crate::publisher::{publish_all, CancellationSink, PublishError, PublishOutcome};
use crate::resolve::resolve;
use crate::source::{CancellationSource, QueryWindow, SourceError};
use crate::time::{local_date_string, local_datetime_string};

/// Which cancellations each poll asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Cancellations still in effect for trips from today on.
    FromNow,
    /// Same as `FromNow`, plus everything modified since the previous poll.
    FromHistory,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown source mode {0:?}")]
pub struct UnknownSourceMode(pub String);

impl FromStr for SourceMode {
    type Err = UnknownSourceMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOW" => Ok(SourceMode::FromNow),
            "HISTORY" | "PAST" => Ok(SourceMode::FromHistory),
            _ => Err(UnknownSourceMode(s.to_owned())),
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("failed to query cancellations: {0}")]
    Source(#[from] SourceError),
    #[error("failed to publish cancellations: {0}")]
    Publish(#[from] PublishError),
}

/// What one successful cycle did, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped_rows: usize,
    pub churn: ChurnStats,
    pub published: PublishOutcome,
}

/// Query bounds for a poll at `now`. In history mode the window starts at the previous
/// successful poll, or one interval back on the first one.
pub fn query_window(
    mode: SourceMode,
    now: DateTime<Utc>,
    last_poll: Option<DateTime<Utc>>,
    interval: Duration,
    zone: Tz,
) -> QueryWindow {
    let now_local = local_datetime_string(now, zone);
    let today = local_date_string(now, zone);

    match mode {
        SourceMode::FromNow => QueryWindow::Now {
            now: now_local,
            today,
        },
        SourceMode::FromHistory => {
            let since = last_poll.unwrap_or_else(|| {
                chrono::Duration::from_std(interval)
                    .ok()
                    .and_then(|interval| now.checked_sub_signed(interval))
                    .unwrap_or(now)
            });
            QueryWindow::History {
                now: now_local,
                today,
                since: local_datetime_string(since, zone),
            }
        }
    }
}

pub struct Poller<S, P> {
    source: S,
    sink: P,
    mode: SourceMode,
    zone: Tz,
    interval: Duration,
    churn: ChurnTracker,
    last_poll: Option<DateTime<Utc>>,
    liveness: HealthRegistry,
    poller_liveness: HealthHandle,
}

impl<S, P> Poller<S, P>
where
    S: CancellationSource,
    P: CancellationSink,
{
    pub fn new(
        source: S,
        sink: P,
        mode: SourceMode,
        zone: Tz,
        interval: Duration,
        liveness: HealthRegistry,
    ) -> Self {
        // A few missed cycles before the probe fails
        let deadline = chrono::Duration::from_std(interval.saturating_mul(4))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let poller_liveness = liveness.register("poller", deadline);

        Self {
            source,
            sink,
            mode,
            zone,
            interval,
            churn: ChurnTracker::new(),
            last_poll: None,
            liveness,
            poller_liveness,
        }
    }

    pub fn query_window(&self, now: DateTime<Utc>) -> QueryWindow {
        query_window(self.mode, now, self.last_poll, self.interval, self.zone)
    }

    /// Start of the last successful cycle.
    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        self.last_poll
    }

    pub fn churn(&self) -> &ChurnTracker {
        &self.churn
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Run a single cycle as of `now`. Cross-cycle state only changes if the cycle succeeds.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, PollError> {
        metrics::counter!(CYCLE_STARTS).increment(1);
        let started = Instant::now();

        let result = self.poll(now).await;

        metrics::histogram!(CYCLE_DURATION).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::counter!(CYCLE_ENDS).increment(1),
            Err(_) => metrics::counter!(CYCLE_FAILURES).increment(1),
        }
        result
    }

    async fn poll(&mut self, now: DateTime<Utc>) -> Result<CycleReport, PollError> {
        let window = self.query_window(now);
        debug!(command = window.command(), "polling cancellations: {:?}", window);

        let rows = self.source.fetch(&window).await?;
        let fetched = rows.len();
        metrics::counter!(ROWS_FETCHED).increment(fetched as u64);

        let batch = parse_rows(rows, self.zone);
        metrics::counter!(ROWS_SKIPPED).increment(batch.skipped as u64);

        let resolved = resolve(batch.records);
        let churn = self.churn.compare(&resolved);
        metrics::gauge!(RESOLVED_TOTAL).set(churn.total as f64);
        metrics::gauge!(RESOLVED_NEW).set(churn.new as f64);
        metrics::gauge!(RESOLVED_REPEATED).set(churn.repeated as f64);
        info!(
            "fetched {} rows, {} cancellations after resolution ({} new, {} repeated)",
            fetched, churn.total, churn.new, churn.repeated
        );

        for record in &resolved {
            debug!(
                trip_id = %record.trip_id,
                deviation_case_id = %record.deviation_case_id,
                status = ?record.status,
                last_modified = record.last_modified_epoch_ms,
                "resolved cancellation for trip {}",
                record.describe()
            );
        }

        let published = publish_all(&self.sink, &resolved).await?;

        self.churn.replace(resolved);
        self.last_poll = Some(now);

        Ok(CycleReport {
            fetched,
            skipped_rows: batch.skipped,
            churn,
            published,
        })
    }

    /// Poll every interval until `shutdown` resolves or a cycle fails, then release the
    /// database pool and flush the producer. A cycle in flight is always finished first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), PollError>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        self.liveness.set_state(PollerState::Running);
        self.poller_liveness.report_healthy();
        info!(mode = ?self.mode, "starting poll loop every {:?}", self.interval);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                _ = interval.tick() => {}
            }

            match self.run_cycle(Utc::now()).await {
                Ok(_) => self.poller_liveness.report_healthy(),
                Err(err) => {
                    error!("poll cycle failed, stopping: {}", err);
                    break Err(err);
                }
            }
        };

        self.liveness.set_state(PollerState::ShuttingDown);
        self.source.close().await;
        self.sink.close().await;
        self.liveness.set_state(PollerState::Stopped);
        info!("poller stopped");

        result
    }
}
