/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use g3_event::ProxyMutex;
use g3_iobuf::MioBuffer;
use g3_plugin_vc::{
    Continuation, PluginVcError, PluginVcType, ShutdownHow, VIO_UNLIMITED, VcEvent, VcEventCode,
};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroy_after_both_sides_closed() {
    let (core, active, passive) = connected_pair().await;

    active.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!core.is_destroyed());

    passive.close();
    wait_destroyed(&core).await;
    assert!(passive.is_closed());

    let (reader, _read_events) = recorder(None);
    let r = passive.issue_read(reader, 1, MioBuffer::default());
    assert!(matches!(r, Err(PluginVcError::Destroyed)));
    let r = core.connect();
    assert!(matches!(r, Err(PluginVcError::Destroyed)));
    // still fine to call
    active.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroy_releases_handlers() {
    let (core, active, passive) = connected_pair().await;

    let (reader, _read_events) = recorder(None);
    passive
        .issue_read(reader.clone(), VIO_UNLIMITED, MioBuffer::default())
        .unwrap();
    assert!(Arc::strong_count(&reader) > 1);

    passive.close();
    active.close();
    wait_destroyed(&core).await;
    // released right after the destroyed flag is set
    tokio::time::timeout(WAIT, async {
        while Arc::strong_count(&reader) > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kill_no_connect() {
    let (acceptor, mut accept_events) = recorder(None);
    let core = alloc(acceptor);

    core.kill_no_connect().unwrap();
    match next_event(&mut accept_events).await {
        VcEvent::AcceptFailed => {}
        e => panic!("unexpected event {e:?}"),
    }
    wait_destroyed(&core).await;
    expect_silence(&mut accept_events, Duration::from_millis(50)).await;

    let r = core.kill_no_connect();
    assert!(matches!(r, Err(PluginVcError::Destroyed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accept_failed_waits_for_acceptor_lock() {
    let mutex = ProxyMutex::new();
    let (acceptor, mut accept_events) = recorder(Some(mutex.clone()));
    let core = alloc(acceptor);

    let guard = mutex.lock();
    core.kill_no_connect().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(accept_events.try_recv().is_err());
    assert!(!core.is_destroyed());
    drop(guard);

    match next_event(&mut accept_events).await {
        VcEvent::AcceptFailed => {}
        e => panic!("unexpected event {e:?}"),
    }
    wait_destroyed(&core).await;
    expect_silence(&mut accept_events, Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accept_waits_for_acceptor_lock() {
    let mutex = ProxyMutex::new();
    let (acceptor, mut accept_events) = recorder(Some(mutex.clone()));
    let core = alloc(acceptor);

    let guard = mutex.lock();
    let active = core.connect().unwrap();
    assert_eq!(active.side(), PluginVcType::Active);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(accept_events.try_recv().is_err());
    drop(guard);

    match next_event(&mut accept_events).await {
        VcEvent::Accept(vc) => assert!(vc.is_same(&core.passive_vc())),
        e => panic!("unexpected event {e:?}"),
    }
    assert!(core.is_connected());
    let r = core.connect();
    assert!(matches!(r, Err(PluginVcError::AlreadyConnected)));
    let r = core.kill_no_connect();
    assert!(matches!(r, Err(PluginVcError::AlreadyConnected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_and_callback() {
    let (acceptor, mut accept_events) = recorder(None);
    let core = alloc(acceptor);

    let (caller, mut caller_events) = recorder(None);
    let caller: Arc<dyn Continuation> = caller;
    core.connect_and_callback(&caller).unwrap();

    match caller_events.try_recv() {
        Ok(VcEvent::Open(vc)) => assert_eq!(vc.side(), PluginVcType::Active),
        _ => panic!("no open event"),
    }
    match next_event(&mut accept_events).await {
        VcEvent::Accept(vc) => assert_eq!(vc.side(), PluginVcType::Passive),
        e => panic!("unexpected event {e:?}"),
    }

    let r = core.connect_and_callback(&caller);
    assert!(matches!(r, Err(PluginVcError::AlreadyConnected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_from_handler() {
    struct CloseOnEos {
        sender: tokio::sync::mpsc::UnboundedSender<()>,
    }

    impl Continuation for CloseOnEos {
        fn handle_event(&self, event: VcEvent) {
            if let VcEvent::Io(g3_plugin_vc::VcEventCode::Eos, vio) = event {
                vio.vc().close();
                vio.vc().close();
                let _ = self.sender.send(());
            }
        }
    }

    let (core, active, passive) = connected_pair().await;
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    passive
        .issue_read(
            Arc::new(CloseOnEos { sender }),
            VIO_UNLIMITED,
            MioBuffer::default(),
        )
        .unwrap();

    active.close();
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .unwrap()
        .unwrap();
    wait_destroyed(&core).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_delivered_once() {
    let (_core, active, passive) = connected_pair().await;
    passive.shutdown(ShutdownHow::Read).unwrap();

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"hello");
    let write_vio = active
        .issue_write(writer, 5, source.reader(), false)
        .unwrap();
    let (code, _) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::Error);
    assert_eq!(write_vio.ndone(), 0);

    // the peer close runs both directions of this side again
    passive.close();
    expect_silence(&mut write_events, Duration::from_millis(100)).await;

    // an explicit re-enable reports the state again
    write_vio.reenable().unwrap();
    let (code, _) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::Error);
    expect_silence(&mut write_events, Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eos_delivered_once() {
    let (_core, active, passive) = connected_pair().await;
    active.shutdown(ShutdownHow::Write).unwrap();

    let (reader, mut read_events) = recorder(None);
    let read_vio = passive
        .issue_read(reader, VIO_UNLIMITED, MioBuffer::default())
        .unwrap();
    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::Eos);

    active.close();
    expect_silence(&mut read_events, Duration::from_millis(100)).await;

    read_vio.reenable().unwrap();
    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::Eos);
    expect_silence(&mut read_events, Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_inside_re_enable_now() {
    struct CloseOnComplete {
        armed: AtomicBool,
        sender: mpsc::UnboundedSender<VcEvent>,
    }

    impl Continuation for CloseOnComplete {
        fn handle_event(&self, event: VcEvent) {
            if let VcEvent::Io(VcEventCode::ReadComplete, vio) = &event
                && self.armed.load(Ordering::Acquire)
            {
                vio.vc().close();
            }
            let _ = self.sender.send(event);
        }
    }

    let (core, active, passive) = connected_pair().await;

    let (sender, mut read_events) = mpsc::unbounded_channel();
    let closer = Arc::new(CloseOnComplete {
        armed: AtomicBool::new(false),
        sender,
    });
    let read_vio = passive
        .issue_read(closer.clone(), 5, MioBuffer::default())
        .unwrap();

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"0123456789");
    active
        .issue_write(writer, 10, source.reader(), false)
        .unwrap();
    let (code, _) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::WriteComplete);
    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::ReadComplete);

    let (reader, mut active_read_events) = recorder(None);
    active
        .issue_read(reader, VIO_UNLIMITED, MioBuffer::default())
        .unwrap();

    closer.armed.store(true, Ordering::Release);
    read_vio.set_nbytes(10).unwrap();
    read_vio.reenable_now().unwrap();
    match read_events.try_recv() {
        Ok(VcEvent::Io(code, vio)) => {
            assert_eq!(code, VcEventCode::ReadComplete);
            assert_eq!(vio.ndone(), 10);
        }
        _ => panic!("no inline event"),
    }
    assert!(passive.is_closed());

    let (code, _) = next_io(&mut active_read_events).await;
    assert_eq!(code, VcEventCode::Eos);
    assert!(!core.is_destroyed());

    active.close();
    wait_destroyed(&core).await;
}
