/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use g3_event::ProxyMutex;

use super::{PluginVc, Vio};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcEventCode {
    ReadReady,
    ReadComplete,
    WriteReady,
    WriteComplete,
    Eos,
    Error,
    ActiveTimeout,
    InactivityTimeout,
}

impl VcEventCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VcEventCode::ReadReady => "ReadReady",
            VcEventCode::ReadComplete => "ReadComplete",
            VcEventCode::WriteReady => "WriteReady",
            VcEventCode::WriteComplete => "WriteComplete",
            VcEventCode::Eos => "Eos",
            VcEventCode::Error => "Error",
            VcEventCode::ActiveTimeout => "ActiveTimeout",
            VcEventCode::InactivityTimeout => "InactivityTimeout",
        }
    }
}

impl fmt::Display for VcEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum VcEvent {
    /// Progress, completion or failure of a read or write operation.
    Io(VcEventCode, Vio),
    /// Sent to the acceptor with the passive side once connected.
    Accept(PluginVc),
    /// Sent to the acceptor if the active side closed before any connect.
    AcceptFailed,
    /// Sent to the caller of `connect_and_callback` with the active side.
    Open(PluginVc),
}

impl fmt::Debug for VcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcEvent::Io(code, vio) => f.debug_tuple("Io").field(code).field(vio).finish(),
            VcEvent::Accept(vc) => f.debug_tuple("Accept").field(vc).finish(),
            VcEvent::AcceptFailed => f.write_str("AcceptFailed"),
            VcEvent::Open(vc) => f.debug_tuple("Open").field(vc).finish(),
        }
    }
}

/// The receiver of plugin vc events.
///
/// If a mutex is returned, it will be held whenever events are delivered
/// from the event processor.
pub trait Continuation: Send + Sync {
    fn mutex(&self) -> Option<ProxyMutex> {
        None
    }

    fn handle_event(&self, event: VcEvent);
}
