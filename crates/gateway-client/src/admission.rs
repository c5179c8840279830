//! Admission gate limiting concurrent calls to one backend.

use crate::error::{GatewayError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed-capacity counting gate.
///
/// A slot is held by an [`AdmissionPermit`] and released when the permit is
/// dropped. Waiters are not guaranteed to be admitted in arrival order.
#[derive(Debug)]
pub struct AdmissionGate {
    /// Backend the gate belongs to
    backend: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots.
    #[must_use]
    pub fn new(backend: impl Into<String>, capacity: usize) -> Self {
        Self {
            backend: backend.into(),
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a slot or for `cancel` to fire, whichever comes first.
    ///
    /// # Errors
    /// Returns [`GatewayError::AdmissionCancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionPermit> {
        if self.semaphore.available_permits() == 0 {
            debug!(
                backend = %self.backend,
                capacity = self.capacity,
                "Waiting for admission slot"
            );
        }

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(backend = %self.backend, "Admission wait cancelled");
                Err(GatewayError::admission_cancelled(&self.backend))
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                let permit = permit
                    .map_err(|_| GatewayError::internal("admission semaphore closed"))?;
                debug!(
                    backend = %self.backend,
                    in_flight = self.in_flight(),
                    "Admission slot acquired"
                );
                Ok(AdmissionPermit {
                    _permit: permit,
                    backend: self.backend.clone(),
                })
            }
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of held slots.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

/// A held admission slot, released on drop.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    backend: String,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        debug!(backend = %self.backend, "Admission slot released");
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_acquire_release() {
        let gate = AdmissionGate::new("test", 2);
        let cancel = CancellationToken::new();
        assert_eq!(gate.in_flight(), 0);

        let permit1 = gate.acquire(&cancel).await.expect("acquire 1");
        assert_eq!(gate.in_flight(), 1);

        let permit2 = gate.acquire(&cancel).await.expect("acquire 2");
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);

        drop(permit1);
        assert_eq!(gate.in_flight(), 1);

        drop(permit2);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let gate = Arc::new(AdmissionGate::new("test", 1));
        let cancel = CancellationToken::new();
        let _held = gate.acquire(&cancel).await.expect("acquire");

        let waiter_cancel = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let token = waiter_cancel.clone();
            tokio::spawn(async move { gate.acquire(&token).await })
        };

        sleep(Duration::from_millis(50)).await;
        waiter_cancel.cancel();

        let result = waiter.await.expect("join");
        assert!(matches!(
            result,
            Err(GatewayError::AdmissionCancelled { ref backend }) if backend == "test"
        ));
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_wins_over_free_slot() {
        let gate = AdmissionGate::new("test", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(gate.acquire(&cancel).await.is_err());
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiter_admitted_after_release() {
        let gate = Arc::new(AdmissionGate::new("test", 1));
        let cancel = CancellationToken::new();
        let held = gate.acquire(&cancel).await.expect("acquire");

        let waiter = {
            let gate = Arc::clone(&gate);
            let token = cancel.clone();
            tokio::spawn(async move { gate.acquire(&token).await.map(|_| ()) })
        };

        sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.expect("join").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let gate = Arc::new(AdmissionGate::new("test", 3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let gate = Arc::clone(&gate);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let _permit = gate.acquire(&cancel).await.expect("acquire");
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("join");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_flight(), 0);
    }
}
