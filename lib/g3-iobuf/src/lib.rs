/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod buffer;
pub use buffer::MioBuffer;

mod reader;
pub use reader::BufferReader;

pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;
pub const MINIMAL_BLOCK_SIZE: usize = 128;
