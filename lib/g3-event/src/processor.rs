/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::trace;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Event, EventError, ProxyMutex};

pub(crate) const DEFAULT_LOCK_RETRY_TIME: Duration = Duration::from_millis(10);
const MINIMAL_PERIOD: Duration = Duration::from_millis(1);

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

struct ProcessorInner {
    handle: Handle,
    lock_retry_time: Duration,
}

/// Runs callbacks on tokio worker threads, each under an optional
/// [`ProxyMutex`] which is try-locked before the call.
///
/// If the mutex is busy the callback is retried after the lock retry time.
#[derive(Clone)]
pub struct EventProcessor {
    inner: Arc<ProcessorInner>,
}

impl EventProcessor {
    pub fn new(handle: Handle, lock_retry_time: Duration) -> Self {
        EventProcessor {
            inner: Arc::new(ProcessorInner {
                handle,
                lock_retry_time,
            }),
        }
    }

    /// Use the tokio runtime of the calling context.
    pub fn current() -> Result<Self, EventError> {
        let handle = Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        Ok(EventProcessor::new(handle, DEFAULT_LOCK_RETRY_TIME))
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    #[inline]
    pub fn lock_retry_time(&self) -> Duration {
        self.inner.lock_retry_time
    }

    pub fn schedule_imm<F>(&self, mutex: Option<ProxyMutex>, callback: F) -> Event
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.schedule_in(Duration::ZERO, mutex, callback)
    }

    pub fn schedule_in<F>(&self, delay: Duration, mutex: Option<ProxyMutex>, callback: F) -> Event
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let event = Event::new(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed), None);
        let task_event = event.clone();
        let retry = self.inner.lock_retry_time;
        let handle = self.inner.handle.spawn(async move {
            run_once(task_event, delay, mutex, callback, retry).await;
        });
        event.set_abort_handle(handle.abort_handle());
        event
    }

    pub fn schedule_every<F>(&self, period: Duration, mutex: Option<ProxyMutex>, callback: F) -> Event
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let period = period.max(MINIMAL_PERIOD);
        let event = Event::new(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed), Some(period));
        let task_event = event.clone();
        let retry = self.inner.lock_retry_time;
        let handle = self.inner.handle.spawn(async move {
            run_every(task_event, period, mutex, callback, retry).await;
        });
        event.set_abort_handle(handle.abort_handle());
        event
    }
}

async fn run_once<F>(
    event: Event,
    mut delay: Duration,
    mutex: Option<ProxyMutex>,
    mut callback: F,
    retry: Duration,
) where
    F: FnMut(&Event) + Send,
{
    loop {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !dispatch(&event, mutex.as_ref(), &mut callback, retry).await {
            return;
        }
        match event.take_reschedule() {
            Some(d) => delay = d,
            None => return,
        }
    }
}

async fn run_every<F>(
    event: Event,
    period: Duration,
    mutex: Option<ProxyMutex>,
    mut callback: F,
    retry: Duration,
) where
    F: FnMut(&Event) + Send,
{
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if !dispatch(&event, mutex.as_ref(), &mut callback, retry).await {
            return;
        }
    }
}

/// Returns false if the event got cancelled before the callback could run.
async fn dispatch<F>(
    event: &Event,
    mutex: Option<&ProxyMutex>,
    callback: &mut F,
    retry: Duration,
) -> bool
where
    F: FnMut(&Event) + Send,
{
    loop {
        if event.is_cancelled() {
            return false;
        }
        if try_fire(event, mutex, callback) {
            return true;
        }
        trace!("event {} lock miss, retry in {retry:?}", event.id());
        tokio::time::sleep(retry).await;
    }
}

fn try_fire<F>(event: &Event, mutex: Option<&ProxyMutex>, callback: &mut F) -> bool
where
    F: FnMut(&Event),
{
    match mutex {
        Some(m) => {
            let Some(_guard) = m.try_lock() else {
                return false;
            };
            if !event.is_cancelled() {
                callback(event);
            }
            true
        }
        None => {
            callback(event);
            true
        }
    }
}
