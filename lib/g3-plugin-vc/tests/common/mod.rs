/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use g3_event::{EventProcessor, ProxyMutex};
use g3_plugin_vc::{
    ConnectOptions, Continuation, PluginVc, PluginVcConfig, PluginVcCore, VcEvent, VcEventCode,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Forward every event to a channel so the test body can react.
pub struct Recorder {
    mutex: Option<ProxyMutex>,
    sender: mpsc::UnboundedSender<VcEvent>,
}

impl Continuation for Recorder {
    fn mutex(&self) -> Option<ProxyMutex> {
        self.mutex.clone()
    }

    fn handle_event(&self, event: VcEvent) {
        let _ = self.sender.send(event);
    }
}

pub fn recorder(mutex: Option<ProxyMutex>) -> (Arc<Recorder>, mpsc::UnboundedReceiver<VcEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(Recorder { mutex, sender }), receiver)
}

pub fn processor() -> EventProcessor {
    EventProcessor::new(Handle::current(), Duration::from_millis(5))
}

pub fn config() -> Arc<PluginVcConfig> {
    let mut config = PluginVcConfig::default();
    config.set_lock_retry_time(Duration::from_millis(5));
    config.set_inactivity_check_interval(Duration::from_millis(10));
    Arc::new(config)
}

pub fn alloc(acceptor: Arc<Recorder>) -> PluginVcCore {
    PluginVcCore::alloc_with_config(&processor(), config(), acceptor, &ConnectOptions::default())
}

pub async fn next_event(receiver: &mut mpsc::UnboundedReceiver<VcEvent>) -> VcEvent {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub async fn next_io(receiver: &mut mpsc::UnboundedReceiver<VcEvent>) -> (VcEventCode, g3_plugin_vc::Vio) {
    match next_event(receiver).await {
        VcEvent::Io(code, vio) => (code, vio),
        e => panic!("unexpected event {e:?}"),
    }
}

/// Assert nothing arrives for a while.
pub async fn expect_silence(receiver: &mut mpsc::UnboundedReceiver<VcEvent>, wait: Duration) {
    tokio::time::sleep(wait).await;
    if let Ok(e) = receiver.try_recv() {
        panic!("unexpected event {e:?}");
    }
}

/// Connect a new core and return it with both sides.
pub async fn connected_pair() -> (PluginVcCore, PluginVc, PluginVc) {
    let (acceptor, mut accept_events) = recorder(None);
    let core = alloc(acceptor);
    let active = core.connect().unwrap();
    let passive = match next_event(&mut accept_events).await {
        VcEvent::Accept(vc) => vc,
        e => panic!("unexpected event {e:?}"),
    };
    (core, active, passive)
}

pub async fn wait_destroyed(core: &PluginVcCore) {
    tokio::time::timeout(WAIT, async {
        while !core.is_destroyed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("core not destroyed in time");
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
