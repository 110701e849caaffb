//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Login deadline for unauthenticated connections
//!
//! Every accepted connection gets one [`AuthTimer`]. The timer and the
//! connection's worker race to act on it: the worker cancels when the
//! connection logs in or closes, the timer fires when the deadline passes.
//! Both sides go through a single `compare_exchange` on the timer state, so
//! exactly one of them wins and the other becomes a no-op.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

/// Observable state of an [`AuthTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Deadline pending
    Armed,
    /// Cancelled before the deadline; will never fire
    Cancelled,
    /// Deadline passed and the expiry action ran
    Fired,
}

struct TimerInner {
    state: AtomicU8,
    task: OnceLock<AbortHandle>,
}

impl TimerInner {
    fn claim(&self, outcome: u8) -> bool {
        self.state
            .compare_exchange(ARMED, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cancellable one-shot deadline
///
/// Cloning yields another handle to the same timer.
#[derive(Clone)]
pub struct AuthTimer {
    inner: Arc<TimerInner>,
}

impl AuthTimer {
    /// Arm a timer which runs `on_expire` after `duration` unless cancelled first
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = Arc::new(TimerInner {
            state: AtomicU8::new(ARMED),
            task: OnceLock::new(),
        });

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if task_inner.claim(FIRED) {
                trace!("Auth timer fired");
                on_expire();
            }
        });
        let _ = inner.task.set(handle.abort_handle());

        Self { inner }
    }

    /// Cancel the timer
    ///
    /// Returns `true` if this call stopped an armed timer. Returns `false` if
    /// the timer had already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.claim(CANCELLED) {
            if let Some(task) = self.inner.task.get() {
                task.abort();
            }
            true
        } else {
            false
        }
    }

    /// Current state of the timer
    pub fn status(&self) -> TimerStatus {
        match self.inner.state.load(Ordering::Acquire) {
            ARMED => TimerStatus::Armed,
            CANCELLED => TimerStatus::Cancelled,
            _ => TimerStatus::Fired,
        }
    }

    /// True while the deadline is still pending
    pub fn is_armed(&self) -> bool {
        self.status() == TimerStatus::Armed
    }

    /// True once the expiry action has been claimed
    pub fn has_fired(&self) -> bool {
        self.status() == TimerStatus::Fired
    }
}

impl std::fmt::Debug for AuthTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTimer")
            .field("status", &self.status())
            .finish()
    }
}
