//! Retrying registration sink
//!
//! Wraps a [`RegistrationSink`] so transient transport failures on register
//! or deregister are retried with exponential backoff before the reconciler
//! sees them.

use async_trait::async_trait;
use rollcall_core::{InstanceId, Registration, RegistrationSink, SyncError};
use std::future::Future;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FALLBACK_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Lock-free xorshift64 generator used only for jitter
struct JitterSource {
    state: AtomicU64,
}

impl JitterSource {
    fn seeded_from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(FALLBACK_SEED);
        Self {
            state: AtomicU64::new(if seed == 0 { FALLBACK_SEED } else { seed }),
        }
    }

    fn next_u64(&self) -> u64 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let mut x = current;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            match self
                .state
                .compare_exchange_weak(current, x, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return x,
                Err(actual) => current = actual,
            }
        }
    }

    /// Uniform value in [0.0, 1.0)
    fn unit(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

static JITTER: LazyLock<JitterSource> = LazyLock::new(JitterSource::seeded_from_clock);

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Retries after the initial attempt (0 = try once)
    pub max_retries: u32,
    /// Delay is randomized by +/- this fraction (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_retries: 3,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Backoff with `max_retries` and default timings
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt` (attempt 0 is the initial try)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, JITTER.unit())
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt) with an explicit jitter sample in [0, 1]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_us = (self.initial_delay.as_micros() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_micros() as f64);

        // jitter in [0, 1] maps to an offset in [-factor, +factor]
        let offset = (jitter.clamp(0.0, 1.0) * 2.0 - 1.0) * base_us * self.jitter_factor;
        Duration::from_micros((base_us + offset).max(1.0) as u64)
    }
}

/// Registration sink that retries failed calls on the wrapped sink
pub struct RetryingSink {
    inner: Arc<dyn RegistrationSink>,
    backoff: BackoffConfig,
    retries: AtomicU64,
    recovered: AtomicU64,
}

impl RetryingSink {
    /// Wrap `inner` with the given backoff
    pub fn new(inner: Arc<dyn RegistrationSink>, backoff: BackoffConfig) -> Self {
        Self {
            inner,
            backoff,
            retries: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
        }
    }

    /// Total retry attempts made
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Calls that failed at least once and then succeeded
    pub fn recovered_count(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }

    async fn with_backoff<T, F, Fut>(
        &self,
        op: &'static str,
        subject: &str,
        call: F,
    ) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.backoff.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.retries.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    op,
                    subject,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying sink call"
                );
                tokio::time::sleep(delay).await;
            }

            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.recovered.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(op, subject, attempt, "sink call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.backoff.max_retries => {
                    tracing::warn!(op, subject, attempt, error = %e, "sink call failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RegistrationSink for RetryingSink {
    async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError> {
        let subject = registration.health_url().to_string();
        self.with_backoff("register", &subject, || {
            self.inner.register(registration.clone())
        })
        .await
    }

    async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError> {
        self.with_backoff("deregister", id.as_str(), || self.inner.deregister(id))
            .await
    }
}

impl std::fmt::Debug for RetryingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingSink")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
