/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

struct EventInner {
    id: u64,
    period: Option<Duration>,
    cancelled: AtomicBool,
    reschedule: Mutex<Option<Duration>>,
    abort_handle: Mutex<Option<AbortHandle>>,
}

/// Handle to a pending callback on an [`EventProcessor`](crate::EventProcessor).
///
/// Clones refer to the same scheduled callback.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("period", &self.inner.period)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

impl Event {
    pub(crate) fn new(id: u64, period: Option<Duration>) -> Self {
        Event {
            inner: Arc::new(EventInner {
                id,
                period,
                cancelled: AtomicBool::new(false),
                reschedule: Mutex::new(None),
                abort_handle: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_periodic(&self) -> bool {
        self.inner.period.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.inner.period
    }

    /// Stop the event. The callback will not be called once this returns,
    /// unless it is already running.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.inner.abort_handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Fire this same event again after `delay`.
    ///
    /// Only meaningful for one-shot events and only when called from the
    /// event's own callback.
    pub fn schedule_in(&self, delay: Duration) {
        *self.inner.reschedule.lock() = Some(delay);
    }

    pub(crate) fn take_reschedule(&self) -> Option<Duration> {
        let delay = self.inner.reschedule.lock().take();
        if self.is_cancelled() { None } else { delay }
    }

    pub(crate) fn set_abort_handle(&self, handle: AbortHandle) {
        let mut slot = self.inner.abort_handle.lock();
        if self.is_cancelled() {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }
}
