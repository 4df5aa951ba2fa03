/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use g3_event::{Event, ProxyMutex, ProxyMutexGuard};

use crate::process;
use crate::vc::EventSlot;
use crate::vc_core::{self, CoreInner, CoreState};
use crate::{PluginVc, PluginVcType, VcEvent, VcEventCode, Vio, VioOp};

fn new_vc_event(core: &Arc<CoreInner>, side: PluginVcType, delay: Duration) -> Event {
    let handler_core = core.clone();
    let callback = move |event: &Event| main_handler(&handler_core, side, event);
    let mutex = Some(core.mutex.clone());
    if delay.is_zero() {
        core.processor.schedule_imm(mutex, callback)
    } else {
        core.processor.schedule_in(delay, mutex, callback)
    }
}

/// Make sure a dispatch of `side` is pending in `slot`.
pub(crate) fn setup_event_cb(
    core: &Arc<CoreInner>,
    st: &mut CoreState,
    side: PluginVcType,
    delay: Duration,
    slot: EventSlot,
) {
    let slot_event = st.vc_mut(side).slot_mut(slot);
    if slot_event.is_none() {
        *slot_event = Some(new_vc_event(core, side, delay));
    }
}

pub(crate) fn setup_inactivity_tick(core: &Arc<CoreInner>, st: &mut CoreState, side: PluginVcType) {
    let handler_core = core.clone();
    let event = core.processor.schedule_every(
        core.config.inactivity_check_interval(),
        Some(core.mutex.clone()),
        move |event: &Event| main_handler(&handler_core, side, event),
    );
    *st.vc_mut(side).slot_mut(EventSlot::InactivityTimeout) = Some(event);
}

/// Try-lock the handler mutex of an operation and check it was not
/// swapped meanwhile.
fn try_lock_vio<'a>(
    core: &CoreInner,
    side: PluginVcType,
    op: VioOp,
    mutex: &'a ProxyMutex,
) -> Option<ProxyMutexGuard<'a>> {
    let guard = mutex.try_lock()?;
    let st = core.state.lock();
    let current = st.vc(side).vio(op).and_then(|v| v.mutex.as_ref());
    match current {
        Some(m) if m.ptr_eq(mutex) => Some(guard),
        _ => None,
    }
}

fn lock_retry(core: &CoreInner, side: PluginVcType, slot: EventSlot, event: &Event) {
    // the inactivity tick will come again by itself
    if slot != EventSlot::InactivityTimeout {
        let retry = core.config.lock_retry_time();
        trace!("[{}] {side}: lock miss, retry in {retry:?}", core.id);
        event.schedule_in(retry);
    }
}

/// Entry point of every scheduled event of one side. The core mutex is
/// held by the event processor when this is called.
pub(crate) fn main_handler(core: &Arc<CoreInner>, side: PluginVcType, event: &Event) {
    let (slot, read_mutex, write_mutex) = {
        let st = core.state.lock();
        if st.destroyed {
            return;
        }
        let vc = st.vc(side);
        let Some(slot) = vc.find_slot(event) else {
            trace!("[{}] {side}: ignore stale event {}", core.id, event.id());
            return;
        };
        debug_assert!(!vc.deletable);
        (slot, vc.read.mutex.clone(), vc.write.mutex.clone())
    };
    trace!(
        "[{}] {side}: received event {} for {slot:?}",
        core.id,
        event.id()
    );

    let _read_guard = match &read_mutex {
        Some(m) => match try_lock_vio(core, side, VioOp::Read, m) {
            Some(guard) => Some(guard),
            None => {
                lock_retry(core, side, slot, event);
                return;
            }
        },
        None => None,
    };
    let _write_guard = match &write_mutex {
        Some(m) => match try_lock_vio(core, side, VioOp::Write, m) {
            Some(guard) => Some(guard),
            None => {
                lock_retry(core, side, slot, event);
                return;
            }
        },
        None => None,
    };

    let closed = {
        let mut st = core.state.lock();
        let vc = st.vc_mut(side);
        if vc.reentrancy_count != 0 {
            warn!(
                "[{}] {side}: dispatch with reentrancy count {}",
                core.id, vc.reentrancy_count
            );
        }
        debug_assert_eq!(vc.reentrancy_count, 0);
        if !vc.closed {
            vc.reentrancy_count += 1;
        }
        vc.closed
    };
    if closed {
        process_close(core, side);
        return;
    }

    match slot {
        EventSlot::ActiveTimeout => {
            process_timeout(core, side, event, slot, VcEventCode::ActiveTimeout);
        }
        EventSlot::InactivityTimeout => {
            let expired = core.state.lock().vc(side).inactivity_expired();
            if expired {
                process_timeout(core, side, event, slot, VcEventCode::InactivityTimeout);
            }
        }
        EventSlot::SmLockRetry | EventSlot::CoreLockRetry => {
            let need_read = {
                let mut st = core.state.lock();
                let vc = st.vc_mut(side);
                *vc.slot_mut(slot) = None;
                vc.need_read_process
            };
            if need_read {
                process::process_read_side(core, side, false);
            }
            let need_write = {
                let st = core.state.lock();
                let vc = st.vc(side);
                vc.need_write_process && !vc.closed
            };
            if need_write {
                process::process_write_side(core, side, false);
            }
        }
    }

    let closed = {
        let mut st = core.state.lock();
        if st.destroyed {
            return;
        }
        let vc = st.vc_mut(side);
        vc.reentrancy_count -= 1;
        vc.closed
    };
    if closed {
        process_close(core, side);
    }
}

fn process_timeout(
    core: &Arc<CoreInner>,
    side: PluginVcType,
    event: &Event,
    slot: EventSlot,
    code: VcEventCode,
) {
    let target = {
        let mut st = core.state.lock();
        let vc = st.vc_mut(side);
        if vc.closed {
            vc.clear_event(slot);
            return;
        }
        let op = [VioOp::Read, VioOp::Write]
            .into_iter()
            .find(|op| vc.is_timeout_target(*op));
        match op.and_then(|op| vc.vio(op).map(|v| (op, v.mutex.clone(), v.cont.clone()))) {
            Some(target) => target,
            None => {
                vc.clear_event(slot);
                return;
            }
        }
    };
    let (op, mutex, cont) = target;

    let _guard = match &mutex {
        Some(m) => match m.try_lock() {
            Some(guard) => Some(guard),
            None => {
                if slot == EventSlot::ActiveTimeout {
                    event.schedule_in(core.config.lock_retry_time());
                }
                return;
            }
        },
        None => None,
    };

    core.state.lock().vc_mut(side).clear_event(slot);
    debug!("[{}] {side}: {code} on {op} operation", core.id);
    if let Some(cont) = cont {
        let vio = Vio::new(PluginVc::new(core.clone(), side), op);
        cont.handle_event(VcEvent::Io(code, vio));
    }
}

/// Tear down one side, then see if the whole core can go.
pub(crate) fn process_close(core: &Arc<CoreInner>, side: PluginVcType) {
    {
        let mut st = core.state.lock();
        if st.destroyed {
            return;
        }
        debug!("[{}] {side}: process_close", core.id);
        let connected = st.connected;
        let (vc, other) = st.pair_mut(side);
        vc.deletable = true;
        vc.cancel_all_events();

        if connected && !other.closed {
            other.need_read_process = true;
            other.need_write_process = true;
            setup_event_cb(
                core,
                &mut st,
                side.other(),
                Duration::ZERO,
                EventSlot::CoreLockRetry,
            );
        }
    }
    vc_core::attempt_delete(core);
}
