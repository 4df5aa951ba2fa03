/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::anyhow;

#[cfg(feature = "yaml")]
mod yaml;
#[cfg(feature = "yaml")]
pub use yaml::{PluginVcSettings, parse_event_processor_config};

const MINIMAL_LOCK_RETRY_TIME: Duration = Duration::from_millis(1);
const MINIMAL_INACTIVITY_CHECK_INTERVAL: Duration = Duration::from_millis(1);
const MINIMAL_MAX_BYTES: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginVcConfig {
    lock_retry_time: Duration,
    inactivity_check_interval: Duration,
    default_max_bytes: usize,
    min_block_transfer_bytes: usize,
}

impl Default for PluginVcConfig {
    fn default() -> Self {
        PluginVcConfig {
            lock_retry_time: Duration::from_millis(10),
            inactivity_check_interval: Duration::from_secs(1),
            default_max_bytes: 32768,
            min_block_transfer_bytes: 128,
        }
    }
}

impl PluginVcConfig {
    pub fn set_lock_retry_time(&mut self, time: Duration) {
        self.lock_retry_time = time.max(MINIMAL_LOCK_RETRY_TIME);
    }

    pub fn set_inactivity_check_interval(&mut self, interval: Duration) {
        self.inactivity_check_interval = interval.max(MINIMAL_INACTIVITY_CHECK_INTERVAL);
    }

    pub fn set_default_max_bytes(&mut self, size: usize) {
        self.default_max_bytes = size.max(MINIMAL_MAX_BYTES);
    }

    pub fn set_min_block_transfer_bytes(&mut self, size: usize) {
        self.min_block_transfer_bytes = size;
    }

    #[inline]
    pub fn lock_retry_time(&self) -> Duration {
        self.lock_retry_time
    }

    #[inline]
    pub fn inactivity_check_interval(&self) -> Duration {
        self.inactivity_check_interval
    }

    #[inline]
    pub fn default_max_bytes(&self) -> usize {
        self.default_max_bytes
    }

    #[inline]
    pub fn min_block_transfer_bytes(&self) -> usize {
        self.min_block_transfer_bytes
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.min_block_transfer_bytes > self.default_max_bytes {
            return Err(anyhow!(
                "min block transfer bytes {} should not be larger than default max bytes {}",
                self.min_block_transfer_bytes,
                self.default_max_bytes
            ));
        }
        Ok(())
    }
}

/// Per core settings applied at allocation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    plugin_tag: Option<String>,
    plugin_id: i64,
    buffer_block_size: usize,
    buffer_water_mark: usize,
    active_addr: Option<SocketAddr>,
    passive_addr: Option<SocketAddr>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            plugin_tag: None,
            plugin_id: 0,
            buffer_block_size: g3_iobuf::DEFAULT_BLOCK_SIZE,
            buffer_water_mark: 0,
            active_addr: None,
            passive_addr: None,
        }
    }
}

impl ConnectOptions {
    pub fn set_plugin_tag(&mut self, tag: &str) {
        self.plugin_tag = Some(tag.to_string());
    }

    pub fn set_plugin_id(&mut self, id: i64) {
        self.plugin_id = id;
    }

    pub fn set_buffer_block_size(&mut self, size: usize) {
        self.buffer_block_size = size.max(g3_iobuf::MINIMAL_BLOCK_SIZE);
    }

    pub fn set_buffer_water_mark(&mut self, size: usize) {
        self.buffer_water_mark = size;
    }

    pub fn set_active_addr(&mut self, addr: SocketAddr) {
        self.active_addr = Some(addr);
    }

    pub fn set_passive_addr(&mut self, addr: SocketAddr) {
        self.passive_addr = Some(addr);
    }

    pub fn plugin_tag(&self) -> Option<&str> {
        self.plugin_tag.as_deref()
    }

    #[inline]
    pub fn plugin_id(&self) -> i64 {
        self.plugin_id
    }

    #[inline]
    pub fn buffer_block_size(&self) -> usize {
        self.buffer_block_size
    }

    #[inline]
    pub fn buffer_water_mark(&self) -> usize {
        self.buffer_water_mark
    }

    #[inline]
    pub fn active_addr(&self) -> Option<SocketAddr> {
        self.active_addr
    }

    #[inline]
    pub fn passive_addr(&self) -> Option<SocketAddr> {
        self.passive_addr
    }
}
