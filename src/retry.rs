use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tracing::warn;

/// Shared policy wrapping every remote operation. Delay for retry `n` is
/// `base_delay * 2^(n-1)`, capped at `max_delay`, jittered by
/// `+/- jitter_pct%` uniform.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_pct: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter_pct: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// The operation failed with an error the classifier ruled out for
    /// retry; it is surfaced as-is.
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Aborted(last) => Some(last),
        }
    }
}

/// Outcome of a retried operation, with the stats the progress observer
/// reports per part.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
    pub started_at: SystemTime,
    pub duration: Duration,
}

impl RetryPolicy {
    /// Invokes `op` with the 1-based attempt index until it succeeds,
    /// attempts are exhausted, or `retryable` rejects the failure. `on_fail`
    /// runs after every failed attempt, before the backoff sleep; targets use
    /// it to reset a wedged transport. Cancellation is observed at the top of
    /// each attempt.
    pub fn run<T, E, F, P, H>(
        &self,
        cancel: Option<&AtomicBool>,
        mut op: F,
        retryable: P,
        mut on_fail: H,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        H: FnMut(u32, &E),
        E: std::fmt::Display,
    {
        let started_at = SystemTime::now();
        let clock = Instant::now();
        let mut rng = XorShift64::from_clock();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(RetryError::Cancelled);
                }
            }
            match op(attempt) {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        retries: attempt - 1,
                        started_at,
                        duration: clock.elapsed(),
                    })
                }
                Err(err) => {
                    if !retryable(&err) {
                        return Err(RetryError::Aborted(err));
                    }
                    on_fail(attempt, &err);
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt, &mut rng);
                    warn!("attempt {attempt} failed, retrying in {delay:?}: {err}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for_attempt(&self, attempt: u32, rng: &mut XorShift64) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let mut delay = self.base_delay.saturating_mul(1u32 << exp);
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        let jitter_pct = self.jitter_pct.min(100) as u64;
        if jitter_pct == 0 {
            return delay;
        }
        let jitter_ns = (delay.as_nanos() as u64).saturating_mul(jitter_pct) / 100;
        let span = jitter_ns.saturating_mul(2);
        if span == 0 {
            return delay;
        }

        // Uniform in [delay - jitter, delay + jitter].
        let roll = rng.next_u64() % (span + 1);
        let offset = roll as i128 - jitter_ns as i128;
        let nanos = (delay.as_nanos() as i128 + offset).max(0) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

struct XorShift64(u64);

impl XorShift64 {
    fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0);
        Self(nanos | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}
