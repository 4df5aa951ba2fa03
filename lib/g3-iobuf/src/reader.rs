/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;

use super::MioBuffer;

/// Consuming view of a [`MioBuffer`].
#[derive(Clone, Debug)]
pub struct BufferReader {
    buffer: MioBuffer,
}

impl BufferReader {
    pub(crate) fn new(buffer: MioBuffer) -> Self {
        BufferReader { buffer }
    }

    pub fn buffer(&self) -> &MioBuffer {
        &self.buffer
    }

    pub fn read_avail(&self) -> usize {
        self.buffer.inner.lock().read_avail()
    }

    pub fn is_empty(&self) -> bool {
        self.read_avail() == 0
    }

    /// Size of the first contiguous block.
    pub fn block_read_avail(&self) -> usize {
        self.buffer.inner.lock().block_read_avail()
    }

    /// Detach at most `max` bytes from the first block.
    pub fn split_block(&self, max: usize) -> Bytes {
        self.buffer.inner.lock().split_block(max)
    }

    pub fn consume(&self, mut n: usize) -> usize {
        let mut inner = self.buffer.inner.lock();
        let mut consumed = 0;
        while n > 0 {
            let len = inner.split_block(n).len();
            if len == 0 {
                break;
            }
            n -= len;
            consumed += len;
        }
        consumed
    }

    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut inner = self.buffer.inner.lock();
        let mut offset = 0;
        while offset < dst.len() {
            let block = inner.split_block(dst.len() - offset);
            if block.is_empty() {
                break;
            }
            dst[offset..offset + block.len()].copy_from_slice(&block);
            offset += block.len();
        }
        offset
    }

    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.buffer.inner.lock();
        let mut data = Vec::with_capacity(inner.read_avail());
        loop {
            let block = inner.split_block(usize::MAX);
            if block.is_empty() {
                break;
            }
            data.extend_from_slice(&block);
        }
        data
    }
}
