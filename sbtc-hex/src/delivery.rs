//! Webhook delivery engine.
//!
//! Each attempt runs claim → sign → POST → record. The claim is a
//! compare-and-swap on the event row that parks `next_retry_at` at a lease,
//! so two sweeps (or two processes) never attempt the same event at once
//! while the lease holds. Attempts for a single event are therefore strictly
//! sequential; attempts for different events run concurrently up to a bound.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use sbtc_types::domain::webhook::MAX_RESPONSE_BODY_BYTES;
use sbtc_types::signature::{EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, sign};
use sbtc_types::{
    AppError, AttemptRecord, DeliveryOutcome, GatewayRepository, RepoError, WebhookEndpoint,
    WebhookEvent, WebhookEventId,
};

use crate::emitter::DeliveryJob;

const USER_AGENT: &str = concat!("sbtc-gateway-webhooks/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Per-request timeout. Timeouts count as failed attempts.
    pub timeout: Duration,
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Max attempts in flight at once.
    pub concurrency: usize,
    pub sweep_interval: Duration,
    /// Due events picked up per sweep.
    pub sweep_batch: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(3600),
            concurrency: 16,
            sweep_interval: Duration::from_secs(30),
            sweep_batch: 100,
        }
    }
}

/// Delay before the next attempt after the `attempts`-th failure:
/// `min(base * 2^(attempts-1), cap)`.
pub fn backoff_delay(attempts: i32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// Reads at most `limit` bytes of the response body, then drops the rest
/// of the stream. A body error ends the read with what arrived so far.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> String {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Removes the id from the in-flight set when the attempt ends, however it ends.
struct InFlight<'a> {
    set: &'a DashSet<WebhookEventId>,
    id: WebhookEventId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

pub struct DeliveryEngine<R: GatewayRepository> {
    repo: Arc<R>,
    http: reqwest::Client,
    config: DeliveryConfig,
    in_flight: DashSet<WebhookEventId>,
    permits: Semaphore,
}

impl<R: GatewayRepository> DeliveryEngine<R> {
    pub fn new(repo: Arc<R>, config: DeliveryConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Internal(format!("webhook HTTP client: {}", e)))?;

        Ok(Self {
            repo,
            http,
            permits: Semaphore::new(config.concurrency.max(1)),
            in_flight: DashSet::new(),
            config,
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.config.timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + lease
    }

    /// Performs at most one attempt for `event_id`.
    ///
    /// Returns `None` when the event was not claimable: delivered, not yet
    /// due, abandoned (for automatic attempts), or already in flight.
    #[tracing::instrument(skip(self, event_id), fields(event_id = %event_id))]
    pub async fn attempt(
        &self,
        event_id: &WebhookEventId,
        manual: bool,
    ) -> Result<Option<WebhookEvent>, RepoError> {
        if !self.in_flight.insert(event_id.clone()) {
            tracing::debug!("attempt already in flight locally");
            return Ok(None);
        }
        let _guard = InFlight {
            set: &self.in_flight,
            id: event_id.clone(),
        };

        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(None);
        };

        let now = Utc::now();
        let ceiling = (!manual).then_some(self.config.max_attempts);
        let Some(event) = self
            .repo
            .claim_webhook_event(event_id, now, self.lease_until(now), ceiling)
            .await?
        else {
            tracing::debug!("event not claimable");
            return Ok(None);
        };

        let outcome = match self.repo.get_webhook_endpoint(&event.endpoint_id).await? {
            None => DeliveryOutcome::EndpointMissing,
            Some(endpoint) if !endpoint.is_active => DeliveryOutcome::EndpointInactive,
            Some(endpoint) => self.send(&event, &endpoint).await,
        };

        let record = self.record_for(&event, &outcome, Utc::now());
        let updated = self
            .repo
            .record_webhook_attempt(event_id, &record, self.config.max_attempts)
            .await?;

        if updated.delivered {
            tracing::info!(
                attempt = updated.attempts,
                status = ?updated.response_status,
                "webhook delivered"
            );
        } else if let Some(next_retry_at) = updated.next_retry_at {
            tracing::warn!(
                attempt = updated.attempts,
                status = ?updated.response_status,
                %next_retry_at,
                "webhook attempt failed, retry scheduled"
            );
        } else {
            tracing::warn!(
                attempt = updated.attempts,
                status = ?updated.response_status,
                "webhook abandoned after final attempt"
            );
        }

        Ok(Some(updated))
    }

    /// Row update for the attempt that just finished on `event`.
    fn record_for(
        &self,
        event: &WebhookEvent,
        outcome: &DeliveryOutcome,
        attempted_at: DateTime<Utc>,
    ) -> AttemptRecord {
        let delivered = outcome.is_success();
        let attempts = (event.attempts + 1).min(self.config.max_attempts);

        let next_retry_at = if delivered || attempts >= self.config.max_attempts {
            None
        } else {
            let delay = backoff_delay(attempts, self.config.backoff_base, self.config.backoff_max);
            chrono::Duration::from_std(delay)
                .ok()
                .map(|delay| attempted_at + delay)
        };

        AttemptRecord {
            delivered,
            attempted_at,
            next_retry_at,
            response_status: outcome.response_status(),
            response_body: outcome.response_body(),
        }
    }

    async fn send(&self, event: &WebhookEvent, endpoint: &WebhookEndpoint) -> DeliveryOutcome {
        let body = match serde_json::to_vec(&event.envelope()) {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::TransportError(e.to_string()),
        };
        let signature = sign(&body, &endpoint.secret, Utc::now().timestamp());

        let result = self
            .http
            .post(&endpoint.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_TYPE_HEADER, event.event_type.as_str())
            .header(EVENT_ID_HEADER, event.id.as_str())
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let body = read_capped(response, MAX_RESPONSE_BODY_BYTES).await;
                if status.is_success() {
                    DeliveryOutcome::Delivered {
                        status: status.as_u16(),
                        body,
                    }
                } else {
                    DeliveryOutcome::Rejected {
                        status: status.as_u16(),
                        body,
                    }
                }
            }
            Err(e) => DeliveryOutcome::TransportError(e.to_string()),
        }
    }

    /// One pass over every due event.
    pub async fn sweep(self: &Arc<Self>) -> Result<SweepReport, RepoError> {
        let due = self
            .repo
            .list_due_webhook_events(Utc::now(), self.config.max_attempts, self.config.sweep_batch)
            .await?;
        if due.is_empty() {
            return Ok(SweepReport::default());
        }
        tracing::debug!(count = due.len(), "sweeping due webhook events");

        let mut tasks = JoinSet::new();
        for event in due {
            let engine = Arc::clone(self);
            tasks.spawn(async move { engine.attempt(&event.id, false).await });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(event))) => {
                    report.attempted += 1;
                    if event.delivered {
                        report.delivered += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "delivery attempt failed to record"),
                Err(e) => tracing::error!(error = %e, "delivery task panicked"),
            }
        }
        Ok(report)
    }

    /// Runs one attempt in the background.
    pub fn spawn_attempt(self: &Arc<Self>, job: DeliveryJob) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.attempt(&job.event_id, job.manual).await {
                tracing::error!(event_id = %job.event_id, error = %e, "delivery attempt failed to record");
            }
        });
    }
}

/// Drains immediate-attempt jobs and sweeps on an interval.
pub struct DeliveryWorker<R: GatewayRepository> {
    engine: Arc<DeliveryEngine<R>>,
    jobs: mpsc::Receiver<DeliveryJob>,
}

impl<R: GatewayRepository> DeliveryWorker<R> {
    pub fn new(engine: Arc<DeliveryEngine<R>>, jobs: mpsc::Receiver<DeliveryJob>) -> Self {
        Self { engine, jobs }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Sweeps run as their own task so queued jobs and shutdown are served
    /// while one is in progress. A tick that finds the previous sweep still
    /// running is skipped. On shutdown the running sweep is awaited so its
    /// attempts get recorded.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.engine.config().sweep_interval.max(Duration::from_secs(1));
        tracing::info!(interval_secs = period.as_secs(), "delivery worker started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeping: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(job) = self.jobs.recv() => self.engine.spawn_attempt(job),
                _ = ticker.tick() => {
                    if sweeping.as_ref().is_some_and(|sweep| !sweep.is_finished()) {
                        tracing::debug!("previous delivery sweep still running, skipping tick");
                        continue;
                    }
                    sweeping = Some(tokio::spawn(Self::sweep_once(Arc::clone(&self.engine))));
                }
            }
        }

        if let Some(sweep) = sweeping {
            if let Err(e) = sweep.await {
                tracing::error!(error = %e, "delivery sweep panicked");
            }
        }
        tracing::info!("delivery worker stopped");
    }

    async fn sweep_once(engine: Arc<DeliveryEngine<R>>) {
        match engine.sweep().await {
            Ok(report) if report.attempted > 0 => tracing::info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "delivery sweep finished"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "delivery sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(30);
    const CAP: Duration = Duration::from_secs(3600);

    #[test]
    fn test_backoff_doubles_from_base() {
        assert_eq!(backoff_delay(1, BASE, CAP), Duration::from_secs(30));
        assert_eq!(backoff_delay(2, BASE, CAP), Duration::from_secs(60));
        assert_eq!(backoff_delay(3, BASE, CAP), Duration::from_secs(120));
        assert_eq!(backoff_delay(4, BASE, CAP), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(8, BASE, CAP), CAP);
        assert_eq!(backoff_delay(i32::MAX, BASE, CAP), CAP);
    }

    async fn serve_body(body: String) -> String {
        let app = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let body = body.clone();
                async move { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_read_capped_stops_at_limit() {
        let url = serve_body("x".repeat(2 * 1024 * 1024)).await;
        let response = reqwest::get(&url).await.unwrap();

        let body = read_capped(response, MAX_RESPONSE_BODY_BYTES).await;
        assert_eq!(body.len(), MAX_RESPONSE_BODY_BYTES);
    }

    #[tokio::test]
    async fn test_read_capped_short_body_is_whole() {
        let url = serve_body("gateway timeout".into()).await;
        let response = reqwest::get(&url).await.unwrap();

        assert_eq!(read_capped(response, MAX_RESPONSE_BODY_BYTES).await, "gateway timeout");
    }

    #[tokio::test]
    async fn test_read_capped_multibyte_body_stays_bounded() {
        let url = serve_body("é".repeat(100_000)).await;
        let response = reqwest::get(&url).await.unwrap();

        let stored = DeliveryOutcome::Rejected {
            status: 500,
            body: read_capped(response, MAX_RESPONSE_BODY_BYTES).await,
        }
        .response_body()
        .unwrap();
        assert!(stored.len() <= MAX_RESPONSE_BODY_BYTES);
        assert!(stored.starts_with("éé"));
    }

    #[test]
    fn test_backoff_never_decreases() {
        let mut previous = Duration::ZERO;
        for attempts in 0..40 {
            let delay = backoff_delay(attempts, BASE, CAP);
            assert!(delay >= previous, "attempt {} shrank the delay", attempts);
            previous = delay;
        }
    }
}
