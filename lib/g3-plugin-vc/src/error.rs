/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use super::VioOp;

#[derive(Debug, Error)]
pub enum PluginVcError {
    #[error("plugin vc core has been destroyed")]
    Destroyed,
    #[error("plugin vc has been closed")]
    Closed,
    #[error("a {0} operation is still in progress")]
    OperationInProgress(VioOp),
    #[error("buffer ownership transfer is not supported")]
    BufferOwnership,
    #[error("plugin vc core has already been connected")]
    AlreadyConnected,
    #[error("the vio does not belong to this plugin vc")]
    ForeignVio,
    #[error("no {0} operation has been issued")]
    NoOperation(VioOp),
    #[error("byte count {nbytes} is less than the {ndone} bytes already done")]
    InvalidByteCount { nbytes: usize, ndone: usize },
}
