/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;

use g3_event::ProxyMutex;
use g3_iobuf::MioBuffer;
use g3_plugin_vc::{
    Continuation, PluginVc, PluginVcError, VIO_UNLIMITED, VcEvent, VcEventCode, Vio, VioOp,
};

#[derive(Default)]
struct EchoState {
    read_vio: Option<Vio>,
    write_vio: Option<Vio>,
}

/// Accept the passive side and send back everything read from it.
pub(crate) struct EchoServer {
    me: Weak<EchoServer>,
    mutex: ProxyMutex,
    buffer: MioBuffer,
    state: Mutex<EchoState>,
    events: AtomicUsize,
}

impl EchoServer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| EchoServer {
            me: me.clone(),
            mutex: ProxyMutex::new(),
            buffer: MioBuffer::default(),
            state: Mutex::new(EchoState::default()),
            events: AtomicUsize::new(0),
        })
    }

    pub(crate) fn handled_events(&self) -> usize {
        self.events.load(Ordering::Relaxed)
    }

    fn start(&self, vc: PluginVc) -> Result<(), PluginVcError> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let read_vio = vc.issue_read(me.clone(), VIO_UNLIMITED, self.buffer.clone())?;
        let write_vio = vc.issue_write(me, VIO_UNLIMITED, self.buffer.reader(), false)?;
        let mut state = self.state.lock();
        state.read_vio = Some(read_vio);
        state.write_vio = Some(write_vio);
        Ok(())
    }

    fn reenable(&self, op: VioOp) {
        let vio = {
            let state = self.state.lock();
            match op {
                VioOp::Read => state.read_vio.clone(),
                VioOp::Write => state.write_vio.clone(),
                VioOp::None => None,
            }
        };
        if let Some(vio) = vio
            && let Err(e) = vio.reenable()
        {
            debug!("echo: failed to reenable {op}: {e}");
        }
    }

    fn shutdown(&self, vc: &PluginVc) {
        let mut state = self.state.lock();
        state.read_vio = None;
        state.write_vio = None;
        drop(state);
        vc.close();
    }
}

impl Continuation for EchoServer {
    fn mutex(&self) -> Option<ProxyMutex> {
        Some(self.mutex.clone())
    }

    fn handle_event(&self, event: VcEvent) {
        self.events.fetch_add(1, Ordering::Relaxed);
        match event {
            VcEvent::Accept(vc) => {
                debug!("echo: accepted {} vc of core {}", vc.side(), vc.id());
                if let Err(e) = self.start(vc.clone()) {
                    warn!("echo: failed to start: {e}");
                    vc.close();
                }
            }
            VcEvent::AcceptFailed => warn!("echo: accept failed"),
            VcEvent::Io(code, vio) => match code {
                // new data to send back
                VcEventCode::ReadReady | VcEventCode::ReadComplete => self.reenable(VioOp::Write),
                // buffer space freed
                VcEventCode::WriteReady | VcEventCode::WriteComplete => self.reenable(VioOp::Read),
                VcEventCode::Eos
                | VcEventCode::Error
                | VcEventCode::ActiveTimeout
                | VcEventCode::InactivityTimeout => {
                    debug!("echo: {code} on {} operation, closing", vio.op());
                    self.shutdown(vio.vc());
                }
            },
            VcEvent::Open(_) => {}
        }
    }
}
