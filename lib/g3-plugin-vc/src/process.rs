/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use g3_iobuf::{BufferReader, MioBuffer};

use crate::dispatch;
use crate::vc::EventSlot;
use crate::vc_core::{CoreInner, CoreState};
use crate::{Continuation, PluginVc, PluginVcType, VcEvent, VcEventCode, Vio, VioOp};

struct Outcome {
    cont: Option<Arc<dyn Continuation>>,
    code: VcEventCode,
    moved: bool,
}

impl Outcome {
    fn notify(cont: &Option<Arc<dyn Continuation>>, code: VcEventCode) -> Self {
        Outcome {
            cont: cont.clone(),
            code,
            moved: false,
        }
    }

    fn moved(cont: &Option<Arc<dyn Continuation>>, code: VcEventCode) -> Self {
        Outcome {
            cont: cont.clone(),
            code,
            moved: true,
        }
    }
}

/// Move at most `act_on` bytes, linking whole blocks and copying small ones.
pub(crate) fn transfer_bytes(
    transfer_to: &MioBuffer,
    transfer_from: &BufferReader,
    mut act_on: usize,
    min_block_transfer_bytes: usize,
) -> usize {
    let mut total_added = 0;

    while act_on > 0 {
        let block_read_avail = transfer_from.block_read_avail();
        let to_move = act_on.min(block_read_avail);
        if to_move == 0 {
            break;
        }

        let block = transfer_from.split_block(to_move);
        let moved = if block.len() >= min_block_transfer_bytes {
            transfer_to.append_block(block)
        } else {
            // copy so we won't end up with a long chain of tiny blocks
            transfer_to.write(&block)
        };
        if moved == 0 {
            break;
        }

        act_on -= moved;
        total_added += moved;
    }

    total_added
}

fn write_side_step(core: &CoreInner, st: &mut CoreState, side: PluginVcType) -> Option<Outcome> {
    let (vc, other) = st.pair_mut(side);
    vc.need_write_process = false;

    if !vc.write.is_op(VioOp::Write) || vc.write.terminated || vc.closed || vc.write_shutdown {
        return None;
    }
    let ntodo = vc.write.ntodo();
    if ntodo == 0 {
        return None;
    }
    let reader = vc.write.reader()?;
    let act_on = reader.read_avail().min(ntodo);
    debug!("[{}] {side}: process_write_side; act_on {act_on}", core.id);

    if other.closed || other.read_shutdown {
        debug!("[{}] {side}: write side of peer is gone", core.id);
        vc.write.terminated = true;
        return Some(Outcome::notify(&vc.write.cont, VcEventCode::Error));
    }
    if act_on == 0 {
        return Some(Outcome::notify(&vc.write.cont, VcEventCode::WriteReady));
    }

    let core_buffer = core.outbound_buffer(side);
    let water_mark = core_buffer
        .water_mark()
        .max(core.config.default_max_bytes());
    let buf_space = water_mark.saturating_sub(core_buffer.read_avail());
    if buf_space == 0 {
        debug!("[{}] {side}: no space in core buffer", core.id);
        return None;
    }

    let added = transfer_bytes(
        core_buffer,
        &reader,
        act_on.min(buf_space),
        core.config.min_block_transfer_bytes(),
    );
    if added == 0 {
        return None;
    }
    vc.write.ndone += added;
    debug!("[{}] {side}: wrote {added} bytes", core.id);

    let code = if vc.write.ntodo() == 0 {
        vc.write.terminated = true;
        VcEventCode::WriteComplete
    } else {
        VcEventCode::WriteReady
    };
    vc.update_inactive_time();
    Some(Outcome::moved(&vc.write.cont, code))
}

fn read_side_step(core: &CoreInner, st: &mut CoreState, side: PluginVcType) -> Option<Outcome> {
    let (vc, other) = st.pair_mut(side);
    vc.need_read_process = false;

    if !vc.read.is_op(VioOp::Read) || vc.read.terminated || vc.closed || vc.read_shutdown {
        return None;
    }
    let ntodo = vc.read.ntodo();
    if ntodo == 0 {
        return None;
    }
    let core_reader = core.inbound_reader(side);
    let bytes_avail = core_reader.read_avail();
    let act_on = bytes_avail.min(ntodo);
    debug!("[{}] {side}: process_read_side; act_on {act_on}", core.id);

    if act_on == 0 {
        if other.closed || other.write_shutdown {
            debug!("[{}] {side}: peer closed, sending eos", core.id);
            vc.read.terminated = true;
            return Some(Outcome::notify(&vc.read.cont, VcEventCode::Eos));
        }
        return None;
    }

    let output_buffer = vc.read.writer()?;
    let water_mark = output_buffer
        .water_mark()
        .max(core.config.default_max_bytes());
    let buf_space = water_mark.saturating_sub(output_buffer.read_avail());
    if buf_space == 0 {
        debug!("[{}] {side}: read buffer is full", core.id);
        return None;
    }

    let added = transfer_bytes(
        &output_buffer,
        core_reader,
        act_on.min(buf_space),
        core.config.min_block_transfer_bytes(),
    );
    if added == 0 {
        return None;
    }
    vc.read.ndone += added;
    debug!("[{}] {side}: read {added} bytes", core.id);

    let code = if vc.read.ntodo() == 0 {
        vc.read.terminated = true;
        VcEventCode::ReadComplete
    } else {
        VcEventCode::ReadReady
    };
    vc.update_inactive_time();
    Some(Outcome::moved(&vc.read.cont, code))
}

fn deliver(core: &Arc<CoreInner>, side: PluginVcType, op: VioOp, outcome: &Outcome) {
    if let Some(cont) = &outcome.cont {
        trace!("[{}] {side}: deliver {} for {op}", core.id, outcome.code);
        let vio = Vio::new(PluginVc::new(core.clone(), side), op);
        cont.handle_event(VcEvent::Io(outcome.code, vio));
    }
}

/// Let the peer pick up what has just been transferred.
fn wake_peer(core: &Arc<CoreInner>, peer: PluginVcType, op: VioOp, other_side_call: bool) {
    if other_side_call {
        // already inside the processing of the peer, go through re-enable
        let mut st = core.state.lock();
        if st.destroyed || st.vc(peer).closed {
            return;
        }
        st.vc_mut(peer).set_need_process(op);
        dispatch::setup_event_cb(core, &mut st, peer, Duration::ZERO, EventSlot::SmLockRetry);
        return;
    }

    let mutex = {
        let st = core.state.lock();
        if st.destroyed {
            return;
        }
        let vc = st.vc(peer);
        if vc.closed {
            return;
        }
        match vc.vio(op) {
            Some(vio) if vio.is_op(op) => vio.mutex.clone(),
            _ => None,
        }
    };
    let Some(mutex) = mutex else {
        return;
    };

    let locked = match mutex.try_lock() {
        Some(_guard) => {
            let same_mutex = {
                let st = core.state.lock();
                st.vc(peer)
                    .vio(op)
                    .and_then(|v| v.mutex.as_ref())
                    .is_some_and(|m| m.ptr_eq(&mutex))
            };
            if same_mutex {
                match op {
                    VioOp::Read => process_read_side(core, peer, true),
                    VioOp::Write => process_write_side(core, peer, true),
                    VioOp::None => {}
                }
            }
            same_mutex
        }
        None => false,
    };
    if !locked {
        let retry = core.config.lock_retry_time();
        trace!("[{}] {peer}: {op} lock miss, retry in {retry:?}", core.id);
        let mut st = core.state.lock();
        if st.destroyed || st.vc(peer).closed {
            return;
        }
        st.vc_mut(peer).set_need_process(op);
        dispatch::setup_event_cb(core, &mut st, peer, retry, EventSlot::CoreLockRetry);
    }
}

pub(crate) fn process_write_side(core: &Arc<CoreInner>, side: PluginVcType, other_side_call: bool) {
    let outcome = {
        let mut st = core.state.lock();
        if st.destroyed {
            return;
        }
        write_side_step(core, &mut st, side)
    };
    let Some(outcome) = outcome else {
        return;
    };

    deliver(core, side, VioOp::Write, &outcome);
    if outcome.moved {
        wake_peer(core, side.other(), VioOp::Read, other_side_call);
    }
}

pub(crate) fn process_read_side(core: &Arc<CoreInner>, side: PluginVcType, other_side_call: bool) {
    let outcome = {
        let mut st = core.state.lock();
        if st.destroyed {
            return;
        }
        read_side_step(core, &mut st, side)
    };
    let Some(outcome) = outcome else {
        return;
    };

    deliver(core, side, VioOp::Read, &outcome);
    if outcome.moved {
        wake_peer(core, side.other(), VioOp::Write, other_side_call);
    }
}
