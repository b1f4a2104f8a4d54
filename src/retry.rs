use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TrackingConfig;
use crate::processor::FixPipeline;
use crate::queue::FlushReport;

/// Counts consecutive failed flushes and trips after `max_failures`.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    max_failures: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            cooldown,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// A flush that delivered nothing while items were failing.
fn is_failed_flush(report: &FlushReport) -> bool {
    report.failed > 0 && report.sent == 0
}

/// Flushes the queue every `retry_interval` until aborted.
pub fn spawn_retry_loop(pipeline: Arc<FixPipeline>, config: &TrackingConfig) -> JoinHandle<()> {
    let retry_interval = config.retry_interval;
    let mut breaker = CircuitBreaker::new(config.max_retries, config.circuit_breaker_cooldown);

    tokio::spawn(async move {
        info!(
            interval_secs = retry_interval.as_secs(),
            "Location retry loop started"
        );

        loop {
            // Circuit breaker check
            if breaker.is_tripped() {
                warn!(
                    failed_flushes = breaker.consecutive_failures(),
                    cooldown_secs = breaker.cooldown().as_secs(),
                    "Retry circuit open, pausing flushes"
                );
                tokio::time::sleep(breaker.cooldown()).await;
                breaker.reset();
                info!("Retry circuit closed, flushing again");
            }

            tokio::time::sleep(retry_interval).await;

            match pipeline.flush().await {
                Ok(report) if is_failed_flush(&report) => {
                    breaker.record_failure();
                    warn!(
                        "Retry flush delivered nothing ({} failed). Failure count {} / {}",
                        report.failed,
                        breaker.consecutive_failures(),
                        breaker.max_failures
                    );
                }
                Ok(report) => {
                    if report.attempted > 0 {
                        debug!(sent = report.sent, failed = report.failed, "Retry flush done");
                    }
                    breaker.record_success();
                }
                Err(e) => {
                    breaker.record_failure();
                    error!(
                        "Retry flush failed: {}. Failure count {} / {}",
                        e,
                        breaker.consecutive_failures(),
                        breaker.max_failures
                    );
                }
            }
        }
    })
}
