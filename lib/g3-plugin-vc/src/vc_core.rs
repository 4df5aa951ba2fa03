/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, trace};
use parking_lot::Mutex;

use g3_event::{Event, EventProcessor, ProxyMutex};
use g3_iobuf::{BufferReader, MioBuffer};

use crate::config::{ConnectOptions, PluginVcConfig};
use crate::vc::VcState;
use crate::{Continuation, PluginVc, PluginVcError, PluginVcType, UserData, VcEvent};

static NEXT_CORE_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) struct CoreState {
    pub(crate) connected: bool,
    pub(crate) destroyed: bool,
    pub(crate) connect_to: Option<Arc<dyn Continuation>>,
    pub(crate) accept_event: Option<Event>,
    pub(crate) vcs: [VcState; 2],
    pub(crate) active_data: Option<UserData>,
    pub(crate) passive_data: Option<UserData>,
    pub(crate) active_addr: Option<SocketAddr>,
    pub(crate) passive_addr: Option<SocketAddr>,
    pub(crate) plugin_tag: Option<Arc<str>>,
    pub(crate) plugin_id: i64,
}

impl CoreState {
    fn new(acceptor: Arc<dyn Continuation>, options: &ConnectOptions) -> Self {
        CoreState {
            connected: false,
            destroyed: false,
            connect_to: Some(acceptor),
            accept_event: None,
            vcs: [VcState::new(), VcState::new()],
            active_data: None,
            passive_data: None,
            active_addr: options.active_addr(),
            passive_addr: options.passive_addr(),
            plugin_tag: options.plugin_tag().map(Arc::from),
            plugin_id: options.plugin_id(),
        }
    }

    #[inline]
    pub(crate) fn vc(&self, side: PluginVcType) -> &VcState {
        &self.vcs[side.index()]
    }

    #[inline]
    pub(crate) fn vc_mut(&mut self, side: PluginVcType) -> &mut VcState {
        &mut self.vcs[side.index()]
    }

    /// Borrow the given side and its peer at the same time.
    pub(crate) fn pair_mut(&mut self, side: PluginVcType) -> (&mut VcState, &mut VcState) {
        let [active, passive] = &mut self.vcs;
        match side {
            PluginVcType::Active => (active, passive),
            PluginVcType::Passive => (passive, active),
        }
    }
}

pub(crate) struct CoreInner {
    pub(crate) id: u32,
    pub(crate) mutex: ProxyMutex,
    pub(crate) processor: EventProcessor,
    pub(crate) config: Arc<PluginVcConfig>,
    a_to_p_buffer: MioBuffer,
    a_to_p_reader: BufferReader,
    p_to_a_buffer: MioBuffer,
    p_to_a_reader: BufferReader,
    pub(crate) state: Mutex<CoreState>,
}

impl CoreInner {
    /// The channel written by the write side of `side`.
    pub(crate) fn outbound_buffer(&self, side: PluginVcType) -> &MioBuffer {
        match side {
            PluginVcType::Active => &self.a_to_p_buffer,
            PluginVcType::Passive => &self.p_to_a_buffer,
        }
    }

    /// The channel drained by the read side of `side`.
    pub(crate) fn inbound_reader(&self, side: PluginVcType) -> &BufferReader {
        match side {
            PluginVcType::Active => &self.p_to_a_reader,
            PluginVcType::Passive => &self.a_to_p_reader,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcceptStage {
    Accept,
    AcceptFailed,
}

fn state_send_accept(core: &Arc<CoreInner>, stage: AcceptStage) {
    let acceptor = {
        let st = core.state.lock();
        if st.destroyed {
            return;
        }
        st.connect_to.clone()
    };
    let Some(acceptor) = acceptor else {
        if stage == AcceptStage::AcceptFailed {
            destroy(core);
        }
        return;
    };

    let mutex = acceptor.mutex();
    let _guard = match &mutex {
        Some(m) => match m.try_lock() {
            Some(guard) => Some(guard),
            None => {
                trace!("[{}] acceptor lock miss, retry later", core.id);
                schedule_accept_retry(core, stage);
                return;
            }
        },
        None => None,
    };

    match stage {
        AcceptStage::Accept => {
            debug!("[{}] sending accept to acceptor", core.id);
            let passive = PluginVc::new(core.clone(), PluginVcType::Passive);
            acceptor.handle_event(VcEvent::Accept(passive));
        }
        AcceptStage::AcceptFailed => {
            debug!("[{}] sending accept failed to acceptor", core.id);
            acceptor.handle_event(VcEvent::AcceptFailed);
            destroy(core);
        }
    }
}

fn schedule_accept_retry(core: &Arc<CoreInner>, stage: AcceptStage) {
    let mut st = core.state.lock();
    if st.destroyed || st.accept_event.is_some() {
        return;
    }
    let retry_core = core.clone();
    let event = core.processor.schedule_in(
        core.config.lock_retry_time(),
        Some(core.mutex.clone()),
        move |event| {
            {
                let mut st = retry_core.state.lock();
                if st.accept_event.as_ref() != Some(event) {
                    return;
                }
                st.accept_event = None;
            }
            state_send_accept(&retry_core, stage);
        },
    );
    st.accept_event = Some(event);
}

/// Free the core once both sides are done, or tell the acceptor the
/// connection never happened.
pub(crate) fn attempt_delete(core: &Arc<CoreInner>) {
    let stage = {
        let st = core.state.lock();
        if st.destroyed || !st.vc(PluginVcType::Active).deletable {
            return;
        }
        if st.vc(PluginVcType::Passive).deletable {
            None
        } else if !st.connected {
            if st.accept_event.is_some() {
                return;
            }
            Some(AcceptStage::AcceptFailed)
        } else {
            return;
        }
    };
    match stage {
        Some(stage) => state_send_accept(core, stage),
        None => destroy(core),
    }
}

pub(crate) fn destroy(core: &Arc<CoreInner>) {
    // handlers may hold vc handles, drop them after the state lock is released
    let garbage = {
        let mut st = core.state.lock();
        if st.destroyed {
            return;
        }
        debug!("[{}] destroying plugin vc core", core.id);
        st.destroyed = true;
        if let Some(event) = st.accept_event.take() {
            event.cancel();
        }
        let mut vios = Vec::with_capacity(4);
        for vc in st.vcs.iter_mut() {
            vc.cancel_all_events();
            vios.push(vc.read.take());
            vios.push(vc.write.take());
        }
        (
            vios,
            st.connect_to.take(),
            st.active_data.take(),
            st.passive_data.take(),
        )
    };
    core.a_to_p_buffer.clear();
    core.p_to_a_buffer.clear();
    drop(garbage);
}

/// The owner of a pair of plugin vcs.
#[derive(Clone)]
pub struct PluginVcCore {
    inner: Arc<CoreInner>,
}

impl fmt::Debug for PluginVcCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginVcCore")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl PluginVcCore {
    pub fn alloc(
        processor: &EventProcessor,
        acceptor: Arc<dyn Continuation>,
        options: &ConnectOptions,
    ) -> Self {
        PluginVcCore::alloc_with_config(
            processor,
            Arc::new(PluginVcConfig::default()),
            acceptor,
            options,
        )
    }

    pub fn alloc_with_config(
        processor: &EventProcessor,
        config: Arc<PluginVcConfig>,
        acceptor: Arc<dyn Continuation>,
        options: &ConnectOptions,
    ) -> Self {
        let id = NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed);

        let a_to_p_buffer = MioBuffer::new(options.buffer_block_size());
        a_to_p_buffer.set_water_mark(options.buffer_water_mark());
        let p_to_a_buffer = MioBuffer::new(options.buffer_block_size());
        p_to_a_buffer.set_water_mark(options.buffer_water_mark());

        let inner = CoreInner {
            id,
            mutex: ProxyMutex::new(),
            processor: processor.clone(),
            config,
            a_to_p_reader: a_to_p_buffer.reader(),
            a_to_p_buffer,
            p_to_a_reader: p_to_a_buffer.reader(),
            p_to_a_buffer,
            state: Mutex::new(CoreState::new(acceptor, options)),
        };
        debug!("[{id}] created plugin vc core");
        PluginVcCore {
            inner: Arc::new(inner),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// The lock held while events of both sides are dispatched.
    pub fn mutex(&self) -> &ProxyMutex {
        &self.inner.mutex
    }

    pub fn active_vc(&self) -> PluginVc {
        PluginVc::new(self.inner.clone(), PluginVcType::Active)
    }

    pub fn passive_vc(&self) -> PluginVc {
        PluginVc::new(self.inner.clone(), PluginVcType::Passive)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    fn mark_connected(&self) -> Result<(), PluginVcError> {
        let mut st = self.inner.state.lock();
        if st.destroyed {
            return Err(PluginVcError::Destroyed);
        }
        if st.connected {
            return Err(PluginVcError::AlreadyConnected);
        }
        st.connected = true;
        Ok(())
    }

    /// Connect the pair, the acceptor will receive the passive side.
    pub fn connect(&self) -> Result<PluginVc, PluginVcError> {
        self.mark_connected()?;
        debug!("[{}] connected", self.inner.id);
        state_send_accept(&self.inner, AcceptStage::Accept);
        Ok(self.active_vc())
    }

    /// Connect the pair and hand the active side to `caller` synchronously.
    pub fn connect_and_callback(&self, caller: &Arc<dyn Continuation>) -> Result<(), PluginVcError> {
        let _lock = self.inner.mutex.lock();
        self.mark_connected()?;
        debug!("[{}] connected with callback", self.inner.id);
        state_send_accept(&self.inner, AcceptStage::Accept);
        caller.handle_event(VcEvent::Open(self.active_vc()));
        Ok(())
    }

    /// Give up before connecting, the acceptor will receive `AcceptFailed`.
    pub fn kill_no_connect(&self) -> Result<(), PluginVcError> {
        {
            let st = self.inner.state.lock();
            if st.destroyed {
                return Err(PluginVcError::Destroyed);
            }
            if st.connected {
                return Err(PluginVcError::AlreadyConnected);
            }
            if st.vc(PluginVcType::Active).closed {
                return Err(PluginVcError::Closed);
            }
        }
        debug!("[{}] kill without connect", self.inner.id);
        self.active_vc().close();
        Ok(())
    }

    pub fn set_active_addr(&self, addr: SocketAddr) {
        self.inner.state.lock().active_addr = Some(addr);
    }

    pub fn set_passive_addr(&self, addr: SocketAddr) {
        self.inner.state.lock().passive_addr = Some(addr);
    }

    pub fn set_active_data(&self, data: UserData) {
        let mut st = self.inner.state.lock();
        if !st.destroyed {
            st.active_data = Some(data);
        }
    }

    pub fn set_passive_data(&self, data: UserData) {
        let mut st = self.inner.state.lock();
        if !st.destroyed {
            st.passive_data = Some(data);
        }
    }

    pub fn set_transparent(&self, passive_side: bool, active_side: bool) {
        let mut st = self.inner.state.lock();
        st.vc_mut(PluginVcType::Passive).transparent = passive_side;
        st.vc_mut(PluginVcType::Active).transparent = active_side;
    }

    pub fn set_plugin_id(&self, id: i64) {
        self.inner.state.lock().plugin_id = id;
    }

    pub fn set_plugin_tag(&self, tag: &str) {
        self.inner.state.lock().plugin_tag = Some(Arc::from(tag));
    }
}
