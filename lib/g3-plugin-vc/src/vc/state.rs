/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::{Duration, Instant};

use g3_event::Event;

use crate::vio::VioState;
use crate::VioOp;

/// The timer slots of one side, each holding at most one pending event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventSlot {
    SmLockRetry,
    CoreLockRetry,
    ActiveTimeout,
    InactivityTimeout,
}

pub(crate) struct VcState {
    pub(crate) read: VioState,
    pub(crate) write: VioState,
    pub(crate) read_shutdown: bool,
    pub(crate) write_shutdown: bool,
    pub(crate) need_read_process: bool,
    pub(crate) need_write_process: bool,
    pub(crate) closed: bool,
    pub(crate) deletable: bool,
    pub(crate) reentrancy_count: u32,

    sm_lock_retry_event: Option<Event>,
    core_lock_retry_event: Option<Event>,
    pub(crate) active_timeout: Duration,
    active_event: Option<Event>,
    pub(crate) inactive_timeout: Duration,
    pub(crate) inactive_timeout_at: Option<Instant>,
    inactive_event: Option<Event>,

    pub(crate) transparent: bool,
    pub(crate) internal_request: bool,
}

impl VcState {
    pub(crate) fn new() -> Self {
        VcState {
            read: VioState::default(),
            write: VioState::default(),
            read_shutdown: false,
            write_shutdown: false,
            need_read_process: false,
            need_write_process: false,
            closed: false,
            deletable: false,
            reentrancy_count: 0,
            sm_lock_retry_event: None,
            core_lock_retry_event: None,
            active_timeout: Duration::ZERO,
            active_event: None,
            inactive_timeout: Duration::ZERO,
            inactive_timeout_at: None,
            inactive_event: None,
            transparent: false,
            internal_request: false,
        }
    }

    pub(crate) fn vio(&self, op: VioOp) -> Option<&VioState> {
        match op {
            VioOp::Read => Some(&self.read),
            VioOp::Write => Some(&self.write),
            VioOp::None => None,
        }
    }

    pub(crate) fn vio_mut(&mut self, op: VioOp) -> Option<&mut VioState> {
        match op {
            VioOp::Read => Some(&mut self.read),
            VioOp::Write => Some(&mut self.write),
            VioOp::None => None,
        }
    }

    pub(crate) fn is_shutdown(&self, op: VioOp) -> bool {
        match op {
            VioOp::Read => self.read_shutdown,
            VioOp::Write => self.write_shutdown,
            VioOp::None => false,
        }
    }

    pub(crate) fn set_need_process(&mut self, op: VioOp) {
        match op {
            VioOp::Read => self.need_read_process = true,
            VioOp::Write => self.need_write_process = true,
            VioOp::None => {}
        }
    }

    pub(crate) fn slot(&self, slot: EventSlot) -> &Option<Event> {
        match slot {
            EventSlot::SmLockRetry => &self.sm_lock_retry_event,
            EventSlot::CoreLockRetry => &self.core_lock_retry_event,
            EventSlot::ActiveTimeout => &self.active_event,
            EventSlot::InactivityTimeout => &self.inactive_event,
        }
    }

    pub(crate) fn slot_mut(&mut self, slot: EventSlot) -> &mut Option<Event> {
        match slot {
            EventSlot::SmLockRetry => &mut self.sm_lock_retry_event,
            EventSlot::CoreLockRetry => &mut self.core_lock_retry_event,
            EventSlot::ActiveTimeout => &mut self.active_event,
            EventSlot::InactivityTimeout => &mut self.inactive_event,
        }
    }

    /// Find out which slot the firing event belongs to, `None` if stale.
    pub(crate) fn find_slot(&self, event: &Event) -> Option<EventSlot> {
        [
            EventSlot::SmLockRetry,
            EventSlot::CoreLockRetry,
            EventSlot::ActiveTimeout,
            EventSlot::InactivityTimeout,
        ]
        .into_iter()
        .find(|slot| self.slot(*slot).as_ref() == Some(event))
    }

    /// Forget the event of a fired slot. The inactivity tick is periodic
    /// so it is cancelled along with its deadline.
    pub(crate) fn clear_event(&mut self, slot: EventSlot) {
        if slot == EventSlot::InactivityTimeout {
            self.cancel_inactivity_timeout();
        } else {
            *self.slot_mut(slot) = None;
        }
    }

    pub(crate) fn cancel_active_timeout(&mut self) {
        if let Some(event) = self.active_event.take() {
            event.cancel();
        }
    }

    pub(crate) fn cancel_inactivity_timeout(&mut self) {
        self.inactive_timeout_at = None;
        if let Some(event) = self.inactive_event.take() {
            event.cancel();
        }
    }

    pub(crate) fn cancel_all_events(&mut self) {
        if let Some(event) = self.sm_lock_retry_event.take() {
            event.cancel();
        }
        if let Some(event) = self.core_lock_retry_event.take() {
            event.cancel();
        }
        self.cancel_active_timeout();
        self.cancel_inactivity_timeout();
    }

    pub(crate) fn update_inactive_time(&mut self) {
        if self.inactive_event.is_some() && !self.inactive_timeout.is_zero() {
            self.inactive_timeout_at = Some(Instant::now() + self.inactive_timeout);
        }
    }

    pub(crate) fn inactivity_expired(&self) -> bool {
        self.inactive_timeout_at
            .is_some_and(|at| at <= Instant::now())
    }

    /// Eligible to receive a timeout event on the given direction.
    pub(crate) fn is_timeout_target(&self, op: VioOp) -> bool {
        match self.vio(op) {
            Some(vio) => vio.is_op(op) && !self.is_shutdown(op) && vio.ntodo() > 0,
            None => false,
        }
    }
}
