use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // One trial call allowed
}

#[derive(Debug)]
struct Status {
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker around the payment gateway.
pub struct CircuitBreaker {
    pub name: String,
    status: Mutex<Status>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
}

/// Leave to make one call. Report the result through it; a permit dropped
/// without a result hands the Half-Open trial slot back.
#[must_use]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl Permit<'_> {
    pub fn record_success(mut self) {
        self.reported = true;
        self.breaker.record_success();
    }

    pub fn record_failure(mut self) {
        self.reported = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.reported {
            self.breaker.abandon_trial();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: Mutex::new(Status {
                state: CircuitState::Closed,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout,
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A permit if a call may go through now.
    pub fn check(&self) -> Option<Permit<'_>> {
        let mut status = self.status();
        let trial = match status.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = status
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if !cooled {
                    return None;
                }
                status.state = CircuitState::HalfOpen;
                status.trial_in_flight = true;
                tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                true
            }
            CircuitState::HalfOpen => {
                if status.trial_in_flight {
                    return None;
                }
                status.trial_in_flight = true;
                true
            }
        };

        Some(Permit {
            breaker: self,
            trial,
            reported: false,
        })
    }

    pub fn record_success(&self) {
        let mut status = self.status();
        self.failure_count.store(0, Ordering::SeqCst);
        if status.state == CircuitState::HalfOpen {
            status.state = CircuitState::Closed;
            status.opened_at = None;
            status.trial_in_flight = false;
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
    }

    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut status = self.status();

        let trip = match status.state {
            CircuitState::Closed => count >= self.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            status.state = CircuitState::Open;
            status.opened_at = Some(Instant::now());
            status.trial_in_flight = false;
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }

    fn abandon_trial(&self) {
        let mut status = self.status();
        if status.state == CircuitState::HalfOpen && status.trial_in_flight {
            status.trial_in_flight = false;
            tracing::warn!("Circuit Breaker [{}] trial call abandoned, slot released", self.name);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.status().state
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::SeqCst)
    }
}
