/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::EventError;

mod mutex;
pub use mutex::{ProxyMutex, ProxyMutexGuard};

mod event;
pub use event::Event;

mod processor;
pub use processor::EventProcessor;

mod config;
pub use config::{EventProcessorConfig, EventProcessorGuard};
