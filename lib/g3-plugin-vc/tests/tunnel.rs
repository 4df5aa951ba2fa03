/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use g3_iobuf::MioBuffer;
use g3_plugin_vc::{PluginVcError, PluginVcType, ShutdownHow, VIO_UNLIMITED, VcEventCode, VioOp};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_write_read_complete() {
    let (_core, active, passive) = connected_pair().await;

    let (reader, mut read_events) = recorder(None);
    let sink = MioBuffer::default();
    passive.issue_read(reader, 100, sink.clone()).unwrap();

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    let data = pattern(100);
    source.write(&data);
    active
        .issue_write(writer, 100, source.reader(), false)
        .unwrap();

    let (code, vio) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::WriteComplete);
    assert_eq!(vio.op(), VioOp::Write);
    assert_eq!(vio.ndone(), 100);
    assert_eq!(vio.vc().side(), PluginVcType::Active);

    let (code, vio) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::ReadComplete);
    assert_eq!(vio.ndone(), 100);
    assert!(vio.is_done());
    assert_eq!(sink.reader().read_all(), data);

    expect_silence(&mut write_events, Duration::from_millis(50)).await;
    expect_silence(&mut read_events, Duration::ZERO).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_transfer_both_directions() {
    let (_core, active, passive) = connected_pair().await;

    for (from, to) in [(&active, &passive), (&passive, &active)] {
        let total = 200_000;
        let data = pattern(total);

        let (reader, mut read_events) = recorder(None);
        let sink = MioBuffer::new(4096);
        let sink_reader = sink.reader();
        to.issue_read(reader, total, sink).unwrap();

        let (writer, mut write_events) = recorder(None);
        let source = MioBuffer::new(1000);
        source.write(&data);
        from.issue_write(writer, total, source.reader(), false)
            .unwrap();

        let mut received = Vec::with_capacity(total);
        loop {
            let (code, vio) = next_io(&mut read_events).await;
            received.extend_from_slice(&sink_reader.read_all());
            match code {
                VcEventCode::ReadReady => vio.reenable().unwrap(),
                VcEventCode::ReadComplete => break,
                c => panic!("unexpected event code {c}"),
            }
        }
        assert_eq!(received.len(), total);
        assert!(received == data);

        loop {
            let (code, vio) = next_io(&mut write_events).await;
            if code == VcEventCode::WriteComplete {
                assert_eq!(vio.ndone(), total);
                break;
            }
            assert_eq!(code, VcEventCode::WriteReady);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_backpressure() {
    let (_core, active, passive) = connected_pair().await;

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(&pattern(100_000));
    let write_vio = active
        .issue_write(writer, 100_000, source.reader(), false)
        .unwrap();

    let (code, vio) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::WriteReady);
    assert_eq!(vio.ndone(), 32768);

    // the channel is full, nothing moves
    write_vio.reenable().unwrap();
    expect_silence(&mut write_events, Duration::from_millis(50)).await;
    assert_eq!(write_vio.ndone(), 32768);

    let (reader, mut read_events) = recorder(None);
    let sink = MioBuffer::default();
    let sink_reader = sink.reader();
    passive.issue_read(reader, VIO_UNLIMITED, sink).unwrap();

    let (code, _) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::WriteReady);
    assert!(write_vio.ndone() > 32768);

    let mut received = 0;
    while received < 100_000 {
        let (code, vio) = next_io(&mut read_events).await;
        assert_eq!(code, VcEventCode::ReadReady);
        received += sink_reader.consume(usize::MAX);
        vio.reenable().unwrap();
    }
    assert_eq!(received, 100_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_to_read_shutdown_peer() {
    let (_core, active, passive) = connected_pair().await;
    passive.shutdown(ShutdownHow::Read).unwrap();
    assert!(passive.is_read_shutdown());
    assert!(!passive.is_write_shutdown());

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"hello");
    active
        .issue_write(writer, 5, source.reader(), false)
        .unwrap();

    let (code, vio) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::Error);
    assert_eq!(vio.ndone(), 0);
    assert_eq!(source.read_avail(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eos_on_peer_close() {
    let (_core, active, passive) = connected_pair().await;

    let (reader, mut read_events) = recorder(None);
    passive
        .issue_read(reader, VIO_UNLIMITED, MioBuffer::default())
        .unwrap();
    expect_silence(&mut read_events, Duration::from_millis(30)).await;

    active.close();
    active.close();
    assert!(active.is_closed());

    let (code, vio) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::Eos);
    assert_eq!(vio.vc().side(), PluginVcType::Passive);
    expect_silence(&mut read_events, Duration::from_millis(100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_data_before_eos() {
    let (_core, active, passive) = connected_pair().await;

    let (writer, mut write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"last words");
    active
        .issue_write(writer, 10, source.reader(), false)
        .unwrap();
    let (code, _) = next_io(&mut write_events).await;
    assert_eq!(code, VcEventCode::WriteComplete);
    active.close();

    let (reader, mut read_events) = recorder(None);
    let sink = MioBuffer::default();
    passive
        .issue_read(reader, VIO_UNLIMITED, sink.clone())
        .unwrap();

    let (code, vio) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::ReadReady);
    assert_eq!(sink.reader().read_all(), b"last words");
    vio.reenable().unwrap();
    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::Eos);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn issue_preconditions() {
    let (_core, active, passive) = connected_pair().await;

    let (reader, _read_events) = recorder(None);
    passive
        .issue_read(reader.clone(), 100, MioBuffer::default())
        .unwrap();
    let r = passive.issue_read(reader.clone(), 100, MioBuffer::default());
    assert!(matches!(
        r,
        Err(PluginVcError::OperationInProgress(VioOp::Read))
    ));

    passive.clear_vio(VioOp::Read).unwrap();
    passive
        .issue_read(reader.clone(), 100, MioBuffer::default())
        .unwrap();

    let (writer, _write_events) = recorder(None);
    let source = MioBuffer::default();
    let r = active.issue_write(writer.clone(), 1, source.reader(), true);
    assert!(matches!(r, Err(PluginVcError::BufferOwnership)));

    active.close();
    let r = active.issue_write(writer, 1, source.reader(), false);
    assert!(matches!(r, Err(PluginVcError::Closed)));
    let r = active.shutdown(ShutdownHow::ReadWrite);
    assert!(matches!(r, Err(PluginVcError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn re_enable_now_processes_inline() {
    let (_core, active, passive) = connected_pair().await;

    let (reader, mut read_events) = recorder(None);
    let sink = MioBuffer::default();
    let read_vio = passive.issue_read(reader, 5, sink.clone()).unwrap();

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
    assert_eq!(sink.reader().read_all(), b"01234");

    read_vio.set_nbytes(10).unwrap();
    read_vio.reenable_now().unwrap();
    match read_events.try_recv() {
        Ok(g3_plugin_vc::VcEvent::Io(code, vio)) => {
            assert_eq!(code, VcEventCode::ReadComplete);
            assert_eq!(vio.ndone(), 10);
        }
        _ => panic!("no inline event"),
    }
    assert_eq!(sink.reader().read_all(), b"56789");

    let r = active.re_enable(&read_vio);
    assert!(matches!(r, Err(PluginVcError::ForeignVio)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_nbytes_below_done() {
    let (_core, active, passive) = connected_pair().await;

    let (reader, mut read_events) = recorder(None);
    let read_vio = passive
        .issue_read(reader, 5, MioBuffer::default())
        .unwrap();

    let (writer, _write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"0123456789");
    active
        .issue_write(writer, 10, source.reader(), false)
        .unwrap();
    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::ReadComplete);
    assert_eq!(read_vio.ndone(), 5);

    let r = read_vio.set_nbytes(3);
    assert!(matches!(
        r,
        Err(PluginVcError::InvalidByteCount { nbytes: 3, ndone: 5 })
    ));
    assert_eq!(read_vio.nbytes(), 5);
    assert_eq!(read_vio.ntodo(), 0);

    read_vio.set_nbytes(5).unwrap();
    read_vio.reenable().unwrap();
    expect_silence(&mut read_events, Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_mutex_contention() {
    let (_core, active, passive) = connected_pair().await;

    let mutex = g3_event::ProxyMutex::new();
    let (reader, mut read_events) = recorder(Some(mutex.clone()));
    let sink = MioBuffer::default();

    let guard = mutex.lock();
    let vio = passive.issue_read(reader, 3, sink.clone()).unwrap();
    assert!(vio.mutex().unwrap().ptr_eq(&mutex));

    let (writer, _write_events) = recorder(None);
    let source = MioBuffer::default();
    source.write(b"abc");
    active
        .issue_write(writer, 3, source.reader(), false)
        .unwrap();

    // handler is busy, the read side retries later
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(read_events.try_recv().is_err());
    drop(guard);

    let (code, _) = next_io(&mut read_events).await;
    assert_eq!(code, VcEventCode::ReadComplete);
    assert_eq!(sink.reader().read_all(), b"abc");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn side_data_and_metadata() {
    let (core, active, passive) = connected_pair().await;

    active.set_local_data(Arc::new(1u32)).unwrap();
    passive.set_local_data(Arc::new("passive")).unwrap();
    let remote = passive.remote_data().unwrap();
    assert_eq!(remote.downcast_ref::<u32>(), Some(&1));
    let remote = active.remote_data().unwrap();
    assert_eq!(remote.downcast_ref::<&str>(), Some(&"passive"));

    active.set_remote_data(Arc::new(2u32)).unwrap();
    let local = passive.local_data().unwrap();
    assert_eq!(local.downcast_ref::<u32>(), Some(&2));

    let a_addr = "127.0.0.1:1000".parse().unwrap();
    let p_addr = "127.0.0.1:2000".parse().unwrap();
    core.set_active_addr(a_addr);
    core.set_passive_addr(p_addr);
    assert_eq!(active.local_addr(), Some(a_addr));
    assert_eq!(active.remote_addr(), Some(p_addr));
    assert_eq!(passive.local_addr(), Some(p_addr));
    assert_eq!(passive.remote_addr(), Some(a_addr));

    core.set_plugin_tag("lua");
    core.set_plugin_id(42);
    core.set_transparent(true, false);
    assert_eq!(passive.plugin_tag().as_deref(), Some("lua"));
    assert_eq!(active.plugin_id(), 42);
    assert!(passive.is_transparent());
    assert!(!active.is_transparent());

    passive.set_is_internal_request(true);
    assert!(passive.is_internal_request());
    assert!(!active.is_internal_request());
    assert!(active.other_side().is_same(&passive));
    assert_eq!(active.id(), core.id());
}
