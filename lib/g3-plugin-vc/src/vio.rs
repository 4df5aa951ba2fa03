/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::Arc;

use g3_event::ProxyMutex;
use g3_iobuf::{BufferReader, MioBuffer};

use super::{Continuation, PluginVc, PluginVcError};

/// Byte count for operations that run until further notice.
pub const VIO_UNLIMITED: usize = usize::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VioOp {
    #[default]
    None,
    Read,
    Write,
}

impl VioOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            VioOp::None => "none",
            VioOp::Read => "read",
            VioOp::Write => "write",
        }
    }
}

impl fmt::Display for VioOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
pub(crate) enum VioBuffer {
    #[default]
    None,
    Writer(MioBuffer),
    Reader(BufferReader),
}

#[derive(Default)]
pub(crate) struct VioState {
    pub(crate) op: VioOp,
    pub(crate) cont: Option<Arc<dyn Continuation>>,
    pub(crate) mutex: Option<ProxyMutex>,
    pub(crate) nbytes: usize,
    pub(crate) ndone: usize,
    pub(crate) buffer: VioBuffer,
    /// Error, Eos or completion delivered, stay quiet until re-armed.
    pub(crate) terminated: bool,
}

impl VioState {
    pub(crate) fn new(
        op: VioOp,
        cont: Arc<dyn Continuation>,
        mutex: ProxyMutex,
        nbytes: usize,
        buffer: VioBuffer,
    ) -> Self {
        VioState {
            op,
            cont: Some(cont),
            mutex: Some(mutex),
            nbytes,
            ndone: 0,
            buffer,
            terminated: false,
        }
    }

    #[inline]
    pub(crate) fn is_op(&self, op: VioOp) -> bool {
        self.op == op
    }

    #[inline]
    pub(crate) fn ntodo(&self) -> usize {
        self.nbytes.saturating_sub(self.ndone)
    }

    /// Still active with bytes left to move.
    pub(crate) fn is_pending(&self) -> bool {
        self.op != VioOp::None && self.ntodo() > 0
    }

    pub(crate) fn writer(&self) -> Option<MioBuffer> {
        match &self.buffer {
            VioBuffer::Writer(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub(crate) fn reader(&self) -> Option<BufferReader> {
        match &self.buffer {
            VioBuffer::Reader(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Detach everything, leaving an inactive operation behind.
    pub(crate) fn take(&mut self) -> VioState {
        std::mem::take(self)
    }
}

/// Handle to the read or write operation of a [`PluginVc`].
#[derive(Clone)]
pub struct Vio {
    vc: PluginVc,
    op: VioOp,
}

impl fmt::Debug for Vio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vio")
            .field("vc", &self.vc)
            .field("op", &self.op)
            .finish()
    }
}

impl Vio {
    pub(crate) fn new(vc: PluginVc, op: VioOp) -> Self {
        Vio { vc, op }
    }

    #[inline]
    pub fn op(&self) -> VioOp {
        self.op
    }

    #[inline]
    pub fn vc(&self) -> &PluginVc {
        &self.vc
    }

    pub fn nbytes(&self) -> usize {
        self.vc.with_vio(self.op, |v| v.nbytes).unwrap_or(0)
    }

    pub fn ndone(&self) -> usize {
        self.vc.with_vio(self.op, |v| v.ndone).unwrap_or(0)
    }

    pub fn ntodo(&self) -> usize {
        self.vc.with_vio(self.op, |v| v.ntodo()).unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.ntodo() == 0
    }

    /// Change the total byte count, call `reenable` to make it take effect.
    ///
    /// The new count can not be less than what has already been done.
    pub fn set_nbytes(&self, nbytes: usize) -> Result<(), PluginVcError> {
        self.vc.with_vio_mut(self.op, |v| {
            if nbytes < v.ndone {
                return Err(PluginVcError::InvalidByteCount {
                    nbytes,
                    ndone: v.ndone,
                });
            }
            v.nbytes = nbytes;
            v.terminated = false;
            Ok(())
        })?
    }

    pub fn mutex(&self) -> Option<ProxyMutex> {
        self.vc.with_vio(self.op, |v| v.mutex.clone()).flatten()
    }

    pub fn reenable(&self) -> Result<(), PluginVcError> {
        self.vc.re_enable(self)
    }

    pub fn reenable_now(&self) -> Result<(), PluginVcError> {
        self.vc.re_enable_now(self)
    }
}
