/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

pub type ProxyMutexGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// A shared reentrant lock guarding a group of event handlers.
///
/// The owning thread may acquire it again while already holding it.
#[derive(Clone)]
pub struct ProxyMutex {
    inner: Arc<ReentrantMutex<()>>,
}

impl Default for ProxyMutex {
    fn default() -> Self {
        ProxyMutex::new()
    }
}

impl fmt::Debug for ProxyMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyMutex({:p})", Arc::as_ptr(&self.inner))
    }
}

impl ProxyMutex {
    pub fn new() -> Self {
        ProxyMutex {
            inner: Arc::new(ReentrantMutex::new(())),
        }
    }

    pub fn lock(&self) -> ProxyMutexGuard<'_> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<ProxyMutexGuard<'_>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn ptr_eq(&self, other: &ProxyMutex) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
