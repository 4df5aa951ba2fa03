/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::{BufferReader, DEFAULT_BLOCK_SIZE, MINIMAL_BLOCK_SIZE};

pub(crate) struct BufferInner {
    blocks: VecDeque<Bytes>,
    tail: BytesMut,
    block_size: usize,
    water_mark: usize,
    size: usize,
}

impl BufferInner {
    fn new(block_size: usize) -> Self {
        BufferInner {
            blocks: VecDeque::new(),
            tail: BytesMut::new(),
            block_size: block_size.max(MINIMAL_BLOCK_SIZE),
            water_mark: 0,
            size: 0,
        }
    }

    fn flush_tail(&mut self) {
        if !self.tail.is_empty() {
            let block = self.tail.split().freeze();
            self.blocks.push_back(block);
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let mut left = data;
        while !left.is_empty() {
            if self.tail.capacity() == 0 {
                self.tail.reserve(self.block_size);
            }
            let room = self.block_size.saturating_sub(self.tail.len());
            let n = room.min(left.len());
            self.tail.extend_from_slice(&left[..n]);
            left = &left[n..];
            if self.tail.len() >= self.block_size {
                self.flush_tail();
            }
        }
        self.size += data.len();
        data.len()
    }

    fn append_block(&mut self, block: Bytes) -> usize {
        if block.is_empty() {
            return 0;
        }
        // keep the byte order, anything already written goes first
        self.flush_tail();
        let len = block.len();
        self.blocks.push_back(block);
        self.size += len;
        len
    }

    pub(crate) fn read_avail(&self) -> usize {
        self.size
    }

    pub(crate) fn block_read_avail(&self) -> usize {
        match self.blocks.front() {
            Some(b) => b.len(),
            None => self.tail.len(),
        }
    }

    pub(crate) fn split_block(&mut self, max: usize) -> Bytes {
        let block = if let Some(front) = self.blocks.front_mut() {
            let n = max.min(front.len());
            let block = front.split_to(n);
            if front.is_empty() {
                self.blocks.pop_front();
            }
            block
        } else {
            let n = max.min(self.tail.len());
            self.tail.split_to(n).freeze()
        };
        self.size -= block.len();
        block
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.tail.clear();
        self.size = 0;
    }
}

/// A chain of byte blocks with a single writer and any number of readers
/// sharing the same read position.
#[derive(Clone)]
pub struct MioBuffer {
    pub(crate) inner: Arc<Mutex<BufferInner>>,
}

impl Default for MioBuffer {
    fn default() -> Self {
        MioBuffer::new(DEFAULT_BLOCK_SIZE)
    }
}

impl fmt::Debug for MioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MioBuffer")
            .field("block_size", &inner.block_size)
            .field("water_mark", &inner.water_mark)
            .field("read_avail", &inner.size)
            .finish()
    }
}

impl MioBuffer {
    pub fn new(block_size: usize) -> Self {
        MioBuffer {
            inner: Arc::new(Mutex::new(BufferInner::new(block_size))),
        }
    }

    /// Copy `data` into the buffer, always accepting all of it.
    pub fn write(&self, data: &[u8]) -> usize {
        self.inner.lock().write(data)
    }

    /// Link an existing block to the end of the buffer without copying.
    pub fn append_block(&self, block: Bytes) -> usize {
        self.inner.lock().append_block(block)
    }

    pub fn read_avail(&self) -> usize {
        self.inner.lock().read_avail()
    }

    pub fn is_empty(&self) -> bool {
        self.read_avail() == 0
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.inner.lock().block_size
    }

    pub fn water_mark(&self) -> usize {
        self.inner.lock().water_mark
    }

    pub fn set_water_mark(&self, water_mark: usize) {
        self.inner.lock().water_mark = water_mark;
    }

    /// Drop all unread data.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn reader(&self) -> BufferReader {
        BufferReader::new(self.clone())
    }

    pub fn is_same(&self, other: &MioBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
