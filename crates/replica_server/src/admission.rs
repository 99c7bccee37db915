//! Admission control.
//!
//! A request is checked, under one lock, against the client's rate window,
//! the client's in-flight session and the global concurrency gate. The gate
//! never queues: when it is exhausted the request is rejected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::AdmissionConfig;
use crate::error::{ServerError, ServerResult};

#[derive(Debug, Default)]
struct AdmissionState {
    last_request: HashMap<String, Instant>,
    in_flight: HashSet<String>,
}

/// Gatekeeper for new sessions.
#[derive(Debug)]
pub struct AdmissionController {
    state: Arc<Mutex<AdmissionState>>,
    gate: Arc<Semaphore>,
    rate_window: Duration,
    capacity: usize,
}

/// Held for the lifetime of one pipeline. Dropping it releases the client
/// and the concurrency slot, including during unwinding.
#[derive(Debug)]
pub struct AdmissionPermit {
    key: String,
    state: Arc<Mutex<AdmissionState>>,
    _slot: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn client_key(&self) -> &str {
        &self.key
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
        debug!(client = %self.key, "Admission released");
    }
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(AdmissionState::default())),
            gate: Arc::new(Semaphore::new(config.max_concurrent)),
            rate_window: config.rate_window(),
            capacity: config.max_concurrent,
        }
    }

    /// Admit `key` now.
    pub fn admit(&self, key: &str) -> ServerResult<AdmissionPermit> {
        self.admit_at(key, Instant::now())
    }

    /// Admit `key` as of `now`.
    pub fn admit_at(&self, key: &str, now: Instant) -> ServerResult<AdmissionPermit> {
        let mut state = self.state.lock();

        if let Some(last) = state.last_request.get(key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.rate_window {
                let remaining = self.rate_window - elapsed;
                return Err(ServerError::RateLimited {
                    retry_after_secs: remaining.as_secs_f64().ceil().max(1.0) as u64,
                });
            }
        }
        if state.in_flight.contains(key) {
            return Err(ServerError::Busy);
        }
        let slot = self
            .gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| ServerError::AtCapacity)?;

        let window = self.rate_window;
        state
            .last_request
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        state.last_request.insert(key.to_string(), now);
        state.in_flight.insert(key.to_string());
        debug!(client = %key, "Admitted");

        Ok(AdmissionPermit {
            key: key.to_string(),
            state: self.state.clone(),
            _slot: slot,
        })
    }

    /// Pipelines currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.gate.available_permits()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.state.lock().in_flight.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(window: u64, max: usize) -> AdmissionController {
        AdmissionController::new(&AdmissionConfig {
            rate_window_secs: window,
            max_concurrent: max,
        })
    }

    #[test]
    fn test_rate_window() {
        let admission = controller(10, 3);
        let start = Instant::now();
        let permit = admission.admit_at("a", start).unwrap();
        drop(permit);

        let err = admission
            .admit_at("a", start + Duration::from_secs(4))
            .unwrap_err();
        assert!(matches!(err, ServerError::RateLimited { retry_after_secs: 6 }));
        assert!(admission.admit_at("a", start + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_busy_while_in_flight() {
        let admission = controller(0, 3);
        let start = Instant::now();
        let _permit = admission.admit_at("a", start).unwrap();
        assert!(matches!(
            admission.admit_at("a", start + Duration::from_secs(1)),
            Err(ServerError::Busy)
        ));
        assert!(admission.admit_at("b", start).is_ok());
    }

    #[test]
    fn test_capacity_rejects_without_queueing() {
        let admission = controller(0, 2);
        let now = Instant::now();
        let a = admission.admit_at("a", now).unwrap();
        let _b = admission.admit_at("b", now).unwrap();
        assert!(matches!(admission.admit_at("c", now), Err(ServerError::AtCapacity)));
        assert_eq!(admission.in_flight(), 2);

        drop(a);
        assert_eq!(admission.in_flight(), 1);
        assert!(!admission.is_in_flight("a"));
        assert!(admission.admit_at("c", now).is_ok());
    }

    #[test]
    fn test_rejection_does_not_consume_the_window() {
        let admission = controller(10, 1);
        let now = Instant::now();
        let _held = admission.admit_at("a", now).unwrap();
        assert!(matches!(admission.admit_at("b", now), Err(ServerError::AtCapacity)));
        drop(_held);
        assert!(admission.admit_at("b", now).is_ok());
    }

    #[tokio::test]
    async fn test_permit_released_when_task_panics() {
        let admission = Arc::new(controller(0, 1));
        let permit = admission.admit("a").unwrap();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            panic!("pipeline blew up");
        });
        assert!(handle.await.is_err());

        assert_eq!(admission.in_flight(), 0);
        assert!(!admission.is_in_flight("a"));
    }
}
