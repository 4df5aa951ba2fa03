/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use tokio::runtime::Runtime;

use super::EventProcessor;
use super::processor::DEFAULT_LOCK_RETRY_TIME;

/// Keeps the event runtime alive. Must be dropped outside of async context.
pub struct EventProcessorGuard {
    _rt: Runtime,
}

#[derive(Clone, Debug)]
pub struct EventProcessorConfig {
    thread_number: NonZeroUsize,
    thread_stack_size: Option<usize>,
    thread_name: String,
    lock_retry_time: Duration,
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EventProcessorConfig {
    pub fn new() -> Self {
        let target_thread_number =
            std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        EventProcessorConfig {
            thread_number: target_thread_number,
            thread_stack_size: None,
            thread_name: "event".to_string(),
            lock_retry_time: DEFAULT_LOCK_RETRY_TIME,
        }
    }

    pub fn set_thread_number(&mut self, num: NonZeroUsize) {
        self.thread_number = num;
    }

    pub fn set_thread_stack_size(&mut self, size: usize) {
        self.thread_stack_size = Some(size);
    }

    pub fn set_thread_name(&mut self, name: &str) {
        self.thread_name = name.to_string();
    }

    pub fn set_lock_retry_time(&mut self, time: Duration) {
        self.lock_retry_time = time;
    }

    #[inline]
    pub fn thread_number(&self) -> usize {
        self.thread_number.get()
    }

    #[inline]
    pub fn lock_retry_time(&self) -> Duration {
        self.lock_retry_time
    }

    pub fn check(&mut self) -> anyhow::Result<()> {
        if self.lock_retry_time.is_zero() {
            return Err(anyhow!("lock retry time should not be zero"));
        }
        if self.thread_name.is_empty() {
            return Err(anyhow!("thread name should not be empty"));
        }
        Ok(())
    }

    pub fn start(&self) -> anyhow::Result<(EventProcessor, EventProcessorGuard)> {
        let mut rt_builder = tokio::runtime::Builder::new_multi_thread();
        rt_builder.worker_threads(self.thread_number.get());
        if let Some(stack_size) = self.thread_stack_size {
            rt_builder.thread_stack_size(stack_size);
        }
        rt_builder.enable_time();

        let name = self.thread_name.clone();
        rt_builder.thread_name_fn(move || {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
            format!("{name}#{id}")
        });

        let rt = rt_builder
            .build()
            .map_err(|e| anyhow!("failed to create event runtime: {e}"))?;
        let processor = EventProcessor::new(rt.handle().clone(), self.lock_retry_time);
        Ok((processor, EventProcessorGuard { _rt: rt }))
    }
}
