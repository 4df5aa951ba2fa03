/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::PluginVcError;

pub mod config;
pub use config::{ConnectOptions, PluginVcConfig};

mod event;
pub use event::{Continuation, VcEvent, VcEventCode};

mod vio;
pub use vio::{VIO_UNLIMITED, Vio, VioOp};

mod vc;
pub use vc::{PluginVc, PluginVcType, ShutdownHow};

mod vc_core;
pub use vc_core::PluginVcCore;

mod dispatch;
mod process;

pub type UserData = std::sync::Arc<dyn std::any::Any + Send + Sync>;
