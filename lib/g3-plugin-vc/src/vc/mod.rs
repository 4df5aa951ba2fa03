/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use g3_iobuf::{BufferReader, MioBuffer};

use crate::dispatch;
use crate::process;
use crate::vc_core::{CoreInner, CoreState};
use crate::vio::{VioBuffer, VioState};
use crate::{Continuation, PluginVcError, UserData, Vio, VioOp};

mod state;
pub(crate) use state::{EventSlot, VcState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginVcType {
    Active,
    Passive,
}

impl PluginVcType {
    #[inline]
    pub fn other(self) -> Self {
        match self {
            PluginVcType::Active => PluginVcType::Passive,
            PluginVcType::Passive => PluginVcType::Active,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            PluginVcType::Active => 0,
            PluginVcType::Passive => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginVcType::Active => "Active",
            PluginVcType::Passive => "Passive",
        }
    }
}

impl fmt::Display for PluginVcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownHow {
    Read,
    Write,
    ReadWrite,
}

/// One side of a virtual connection.
///
/// Data written to one side can be read from the other side.
#[derive(Clone)]
pub struct PluginVc {
    core: Arc<CoreInner>,
    side: PluginVcType,
}

impl fmt::Debug for PluginVc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginVc[{}:{}]", self.core.id, self.side)
    }
}

impl PluginVc {
    pub(crate) fn new(core: Arc<CoreInner>, side: PluginVcType) -> Self {
        PluginVc { core, side }
    }

    #[inline]
    pub fn side(&self) -> PluginVcType {
        self.side
    }

    /// Id of the owning core.
    #[inline]
    pub fn id(&self) -> u32 {
        self.core.id
    }

    pub fn other_side(&self) -> PluginVc {
        PluginVc::new(self.core.clone(), self.side.other())
    }

    pub fn is_same(&self, other: &PluginVc) -> bool {
        Arc::ptr_eq(&self.core, &other.core) && self.side == other.side
    }

    fn lock_alive(&self) -> Result<parking_lot::MutexGuard<'_, CoreState>, PluginVcError> {
        let st = self.core.state.lock();
        if st.destroyed {
            Err(PluginVcError::Destroyed)
        } else {
            Ok(st)
        }
    }

    fn lock_open(&self) -> Result<parking_lot::MutexGuard<'_, CoreState>, PluginVcError> {
        let st = self.lock_alive()?;
        if st.vc(self.side).closed {
            Err(PluginVcError::Closed)
        } else {
            Ok(st)
        }
    }

    fn check_vio(&self, vio: &Vio) -> Result<(), PluginVcError> {
        if vio.vc().is_same(self) {
            Ok(())
        } else {
            Err(PluginVcError::ForeignVio)
        }
    }

    pub(crate) fn with_vio<F, R>(&self, op: VioOp, f: F) -> Option<R>
    where
        F: FnOnce(&VioState) -> R,
    {
        let st = self.core.state.lock();
        if st.destroyed {
            return None;
        }
        st.vc(self.side).vio(op).map(f)
    }

    pub(crate) fn with_vio_mut<F, R>(&self, op: VioOp, f: F) -> Result<R, PluginVcError>
    where
        F: FnOnce(&mut VioState) -> R,
    {
        let mut st = self.lock_alive()?;
        st.vc_mut(self.side)
            .vio_mut(op)
            .map(f)
            .ok_or(PluginVcError::NoOperation(op))
    }

    fn issue(
        &self,
        op: VioOp,
        cont: Arc<dyn Continuation>,
        nbytes: usize,
        buffer: VioBuffer,
    ) -> Result<Vio, PluginVcError> {
        let mutex = cont.mutex().unwrap_or_else(|| self.core.mutex.clone());
        let old = {
            let mut st = self.lock_open()?;
            let vc = st.vc_mut(self.side);
            let Some(vio) = vc.vio_mut(op) else {
                return Err(PluginVcError::NoOperation(op));
            };
            if vio.is_pending() {
                return Err(PluginVcError::OperationInProgress(op));
            }
            let old = std::mem::replace(vio, VioState::new(op, cont, mutex, nbytes, buffer));
            vc.set_need_process(op);
            debug!(
                "[{}] {}: issued {op} for {nbytes} bytes",
                self.core.id, self.side
            );
            dispatch::setup_event_cb(
                &self.core,
                &mut st,
                self.side,
                Duration::ZERO,
                EventSlot::SmLockRetry,
            );
            old
        };
        drop(old);
        Ok(Vio::new(self.clone(), op))
    }

    /// Read at most `nbytes` from the other side into `buf`.
    ///
    /// Events are delivered to `cont` later from the event processor.
    pub fn issue_read(
        &self,
        cont: Arc<dyn Continuation>,
        nbytes: usize,
        buf: MioBuffer,
    ) -> Result<Vio, PluginVcError> {
        self.issue(VioOp::Read, cont, nbytes, VioBuffer::Writer(buf))
    }

    /// Write at most `nbytes` from `reader` to the other side.
    pub fn issue_write(
        &self,
        cont: Arc<dyn Continuation>,
        nbytes: usize,
        reader: BufferReader,
        take_ownership: bool,
    ) -> Result<Vio, PluginVcError> {
        if take_ownership {
            return Err(PluginVcError::BufferOwnership);
        }
        self.issue(VioOp::Write, cont, nbytes, VioBuffer::Reader(reader))
    }

    /// Deactivate the read or write operation, detaching its handler and buffer.
    pub fn clear_vio(&self, op: VioOp) -> Result<(), PluginVcError> {
        let old = self.with_vio_mut(op, |vio| vio.take())?;
        drop(old);
        Ok(())
    }

    /// Ask for the operation to be processed again later.
    ///
    /// Callers are expected to hold the mutex of the vio, it is taken here
    /// again as it is reentrant. An operation that already got Error, Eos
    /// or its completion will report its current state once more.
    pub fn re_enable(&self, vio: &Vio) -> Result<(), PluginVcError> {
        self.check_vio(vio)?;
        let op = vio.op();
        let mutex = {
            let st = self.lock_open()?;
            match st.vc(self.side).vio(op) {
                Some(state) if state.is_op(op) => state.mutex.clone(),
                _ => return Err(PluginVcError::NoOperation(op)),
            }
        };
        let _guard = mutex.as_ref().map(|m| m.lock());

        let mut st = self.lock_open()?;
        let vc = st.vc_mut(self.side);
        if let Some(state) = vc.vio_mut(op) {
            state.terminated = false;
        }
        vc.set_need_process(op);
        dispatch::setup_event_cb(
            &self.core,
            &mut st,
            self.side,
            Duration::ZERO,
            EventSlot::SmLockRetry,
        );
        Ok(())
    }

    /// Process the operation right now on the calling thread.
    ///
    /// This blocks on the core mutex, so the caller must not hold the
    /// mutex of another core.
    pub fn re_enable_now(&self, vio: &Vio) -> Result<(), PluginVcError> {
        self.check_vio(vio)?;
        let op = vio.op();
        let _core_lock = self.core.mutex.lock();
        {
            let mut st = self.lock_open()?;
            let vc = st.vc_mut(self.side);
            match vc.vio_mut(op) {
                Some(state) if state.is_op(op) => state.terminated = false,
                _ => return Err(PluginVcError::NoOperation(op)),
            }
            vc.reentrancy_count += 1;
        }

        match op {
            VioOp::Read => process::process_read_side(&self.core, self.side, false),
            VioOp::Write => process::process_write_side(&self.core, self.side, false),
            VioOp::None => {}
        }

        let mut st = self.core.state.lock();
        if st.destroyed {
            return Ok(());
        }
        let vc = st.vc_mut(self.side);
        vc.reentrancy_count -= 1;
        if vc.closed {
            // closed by the handler, finish it from the event processor
            dispatch::setup_event_cb(
                &self.core,
                &mut st,
                self.side,
                Duration::ZERO,
                EventSlot::SmLockRetry,
            );
        }
        Ok(())
    }

    /// Close this side. Calling it again has no effect.
    ///
    /// This blocks on the core mutex, so the caller must not hold the
    /// mutex of another core.
    pub fn close(&self) {
        let _core_lock = self.core.mutex.lock();
        let mut st = self.core.state.lock();
        if st.destroyed {
            return;
        }
        let vc = st.vc_mut(self.side);
        if vc.closed {
            return;
        }
        debug!("[{}] {}: close", self.core.id, self.side);
        vc.closed = true;
        if vc.reentrancy_count == 0 {
            dispatch::setup_event_cb(
                &self.core,
                &mut st,
                self.side,
                Duration::ZERO,
                EventSlot::SmLockRetry,
            );
        }
    }

    pub fn shutdown(&self, how: ShutdownHow) -> Result<(), PluginVcError> {
        let mut st = self.lock_open()?;
        let vc = st.vc_mut(self.side);
        debug!("[{}] {}: shutdown {how:?}", self.core.id, self.side);
        match how {
            ShutdownHow::Read => vc.read_shutdown = true,
            ShutdownHow::Write => vc.write_shutdown = true,
            ShutdownHow::ReadWrite => {
                vc.read_shutdown = true;
                vc.write_shutdown = true;
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        let st = self.core.state.lock();
        st.destroyed || st.vc(self.side).closed
    }

    pub fn is_read_shutdown(&self) -> bool {
        self.core.state.lock().vc(self.side).read_shutdown
    }

    pub fn is_write_shutdown(&self) -> bool {
        self.core.state.lock().vc(self.side).write_shutdown
    }

    /// Arm a one-shot timeout, a zero duration cancels it.
    pub fn set_active_timeout(&self, timeout: Duration) -> Result<(), PluginVcError> {
        let mut st = self.lock_alive()?;
        let vc = st.vc_mut(self.side);
        vc.active_timeout = timeout;
        vc.cancel_active_timeout();
        if !timeout.is_zero() {
            dispatch::setup_event_cb(
                &self.core,
                &mut st,
                self.side,
                timeout,
                EventSlot::ActiveTimeout,
            );
        }
        Ok(())
    }

    /// Time out once nothing has been transferred for `timeout`, a zero
    /// duration cancels it.
    pub fn set_inactivity_timeout(&self, timeout: Duration) -> Result<(), PluginVcError> {
        let mut st = self.lock_alive()?;
        let vc = st.vc_mut(self.side);
        vc.inactive_timeout = timeout;
        if timeout.is_zero() {
            vc.cancel_inactivity_timeout();
            return Ok(());
        }
        vc.inactive_timeout_at = Some(Instant::now() + timeout);
        if vc.slot(EventSlot::InactivityTimeout).is_none() {
            dispatch::setup_inactivity_tick(&self.core, &mut st, self.side);
        }
        Ok(())
    }

    pub fn cancel_active_timeout(&self) {
        let mut st = self.core.state.lock();
        let vc = st.vc_mut(self.side);
        vc.active_timeout = Duration::ZERO;
        vc.cancel_active_timeout();
    }

    pub fn cancel_inactivity_timeout(&self) {
        let mut st = self.core.state.lock();
        let vc = st.vc_mut(self.side);
        vc.inactive_timeout = Duration::ZERO;
        vc.cancel_inactivity_timeout();
    }

    pub fn active_timeout(&self) -> Duration {
        self.core.state.lock().vc(self.side).active_timeout
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.core.state.lock().vc(self.side).inactive_timeout
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        let st = self.core.state.lock();
        match self.side {
            PluginVcType::Active => st.active_addr,
            PluginVcType::Passive => st.passive_addr,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        let st = self.core.state.lock();
        match self.side {
            PluginVcType::Active => st.passive_addr,
            PluginVcType::Passive => st.active_addr,
        }
    }

    fn data_slot(st: &mut CoreState, side: PluginVcType) -> &mut Option<UserData> {
        match side {
            PluginVcType::Active => &mut st.active_data,
            PluginVcType::Passive => &mut st.passive_data,
        }
    }

    pub fn local_data(&self) -> Option<UserData> {
        let mut st = self.core.state.lock();
        Self::data_slot(&mut st, self.side).clone()
    }

    pub fn set_local_data(&self, data: UserData) -> Result<(), PluginVcError> {
        let mut st = self.lock_alive()?;
        *Self::data_slot(&mut st, self.side) = Some(data);
        Ok(())
    }

    pub fn remote_data(&self) -> Option<UserData> {
        let mut st = self.core.state.lock();
        Self::data_slot(&mut st, self.side.other()).clone()
    }

    pub fn set_remote_data(&self, data: UserData) -> Result<(), PluginVcError> {
        let mut st = self.lock_alive()?;
        *Self::data_slot(&mut st, self.side.other()) = Some(data);
        Ok(())
    }

    pub fn is_transparent(&self) -> bool {
        self.core.state.lock().vc(self.side).transparent
    }

    pub fn set_is_internal_request(&self, internal: bool) {
        self.core.state.lock().vc_mut(self.side).internal_request = internal;
    }

    pub fn is_internal_request(&self) -> bool {
        self.core.state.lock().vc(self.side).internal_request
    }

    pub fn plugin_tag(&self) -> Option<Arc<str>> {
        self.core.state.lock().plugin_tag.clone()
    }

    pub fn plugin_id(&self) -> i64 {
        self.core.state.lock().plugin_id
    }
}
