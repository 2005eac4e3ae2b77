//! Local admission control.
//!
//! Bounds the number of requests a client has in flight at once. A request
//! holds one [`AdmissionPermit`] from admission until its response is fully
//! received; redirects acquire a new permit per attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::warn;

use crate::client::ClientError;

#[derive(Debug, Clone)]
pub struct AdmissionController {
    // `None` when unbounded
    permits: Option<Arc<Semaphore>>,
}

impl AdmissionController {
    /// `0` disables admission control.
    pub fn new(max_in_flight: usize) -> Self {
        let permits = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));
        Self { permits }
    }

    /// Waits up to `wait` for a free slot.
    ///
    /// Waiters are served in FIFO order.
    pub async fn acquire(&self, wait: Duration) -> Result<AdmissionPermit, ClientError> {
        let Some(permits) = &self.permits else {
            return Ok(AdmissionPermit::unbounded());
        };

        match timeout(wait, Arc::clone(permits).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionPermit::new(permit)),
            // the semaphore is never closed
            Ok(Err(_closed)) => Err(ClientError::Stopped),
            Err(_elapsed) => {
                warn!(waited = ?wait, "request rejected by admission control");
                Err(ClientError::AdmissionRejected { waited: wait })
            }
        }
    }

    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|permits| permits.available_permits())
    }
}

/// One admitted request. Released explicitly or on drop, whichever comes first.
#[derive(Debug)]
pub struct AdmissionPermit {
    permit: std::sync::Mutex<Option<OwnedSemaphorePermit>>,
    released: AtomicBool,
}

impl AdmissionPermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { permit: std::sync::Mutex::new(Some(permit)), released: AtomicBool::new(false) }
    }

    fn unbounded() -> Self {
        Self { permit: std::sync::Mutex::new(None), released: AtomicBool::new(false) }
    }

    /// Frees the slot. Only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let permit = self.permit.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        drop(permit);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release();
    }
}
