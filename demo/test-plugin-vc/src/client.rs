/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use log::{debug, trace};
use parking_lot::Mutex;

use g3_event::ProxyMutex;
use g3_iobuf::MioBuffer;
use g3_plugin_vc::{Continuation, PluginVc, VcEvent, VcEventCode, Vio, VioOp};

#[derive(Debug, Default)]
pub(crate) struct EchoStats {
    pub(crate) bytes: usize,
    pub(crate) write_events: usize,
    pub(crate) read_events: usize,
}

struct ClientState {
    sent: usize,
    received: usize,
    mismatch_at: Option<usize>,
    stats: EchoStats,
    write_vio: Option<Vio>,
    read_vio: Option<Vio>,
    result_sender: Option<Sender<anyhow::Result<EchoStats>>>,
}

/// Write a known byte pattern to the active side and check it comes back.
pub(crate) struct EchoClient {
    me: Weak<EchoClient>,
    mutex: ProxyMutex,
    total: usize,
    chunk: usize,
    source: MioBuffer,
    sink: MioBuffer,
    state: Mutex<ClientState>,
}

#[inline]
fn pattern_byte(offset: usize) -> u8 {
    (offset % 251) as u8
}

impl EchoClient {
    pub(crate) fn new(
        total: usize,
        chunk: usize,
        result_sender: Sender<anyhow::Result<EchoStats>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| EchoClient {
            me: me.clone(),
            mutex: ProxyMutex::new(),
            total,
            chunk,
            source: MioBuffer::default(),
            sink: MioBuffer::default(),
            state: Mutex::new(ClientState {
                sent: 0,
                received: 0,
                mismatch_at: None,
                stats: EchoStats::default(),
                write_vio: None,
                read_vio: None,
                result_sender: Some(result_sender),
            }),
        })
    }

    pub(crate) fn start(&self, vc: &PluginVc) -> anyhow::Result<()> {
        let Some(me) = self.me.upgrade() else {
            return Err(anyhow!("client already dropped"));
        };
        let _guard = self.mutex.lock();
        self.fill_source();
        let write_vio = vc.issue_write(me.clone(), self.total, self.source.reader(), false)?;
        let read_vio = vc.issue_read(me, self.total, self.sink.clone())?;
        let mut state = self.state.lock();
        state.write_vio = Some(write_vio);
        state.read_vio = Some(read_vio);
        Ok(())
    }

    /// Keep about one block of pending data in the source buffer.
    fn fill_source(&self) {
        let mut state = self.state.lock();
        let mut chunk = vec![0u8; self.chunk];
        while state.sent < self.total && self.source.read_avail() < self.source.block_size() {
            let len = self.chunk.min(self.total - state.sent);
            for (i, b) in chunk[..len].iter_mut().enumerate() {
                *b = pattern_byte(state.sent + i);
            }
            self.source.write(&chunk[..len]);
            state.sent += len;
        }
    }

    fn drain_sink(&self) {
        let data = self.sink.reader().read_all();
        let mut state = self.state.lock();
        if state.mismatch_at.is_none() {
            let offset = state.received;
            state.mismatch_at = data
                .iter()
                .enumerate()
                .find(|(i, b)| **b != pattern_byte(offset + i))
                .map(|(i, _)| offset + i);
        }
        state.received += data.len();
        state.stats.bytes = state.received;
    }

    fn finish(&self, r: anyhow::Result<()>) {
        let mut state = self.state.lock();
        let Some(sender) = state.result_sender.take() else {
            return;
        };
        state.write_vio = None;
        state.read_vio = None;
        let r = match (r, state.mismatch_at) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(offset)) => Err(anyhow!("echo data mismatch at offset {offset}")),
            (Ok(_), None) => Ok(std::mem::take(&mut state.stats)),
        };
        let _ = sender.send(r);
    }

    fn handle_write(&self, code: VcEventCode, vio: &Vio) {
        self.state.lock().stats.write_events += 1;
        match code {
            VcEventCode::WriteReady => {
                self.fill_source();
                if let Err(e) = vio.reenable() {
                    self.finish(Err(anyhow!("failed to reenable write: {e}")));
                }
            }
            VcEventCode::WriteComplete => debug!("client: all {} bytes written", vio.ndone()),
            _ => self.finish(Err(anyhow!("client: {code} while writing"))),
        }
    }

    fn handle_read(&self, code: VcEventCode, vio: &Vio) {
        self.state.lock().stats.read_events += 1;
        match code {
            VcEventCode::ReadReady => {
                self.drain_sink();
                trace!("client: received {} bytes", vio.ndone());
                if let Err(e) = vio.reenable() {
                    self.finish(Err(anyhow!("failed to reenable read: {e}")));
                }
            }
            VcEventCode::ReadComplete => {
                self.drain_sink();
                self.finish(Ok(()));
            }
            _ => self.finish(Err(anyhow!("client: {code} while reading"))),
        }
    }
}

impl Continuation for EchoClient {
    fn mutex(&self) -> Option<ProxyMutex> {
        Some(self.mutex.clone())
    }

    fn handle_event(&self, event: VcEvent) {
        if let VcEvent::Io(code, vio) = event {
            match vio.op() {
                VioOp::Read => self.handle_read(code, &vio),
                VioOp::Write => self.handle_write(code, &vio),
                VioOp::None => {}
            }
        }
    }
}
