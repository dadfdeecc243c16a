// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typed debugger events and the subscription bus.
//!
//! `post` fans out synchronously on the posting thread. Subscribers that
//! need asynchrony enqueue on their own executors; the only guarantee they
//! may rely on is that the posting thread holds no engine mutex.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    adapter::DebugModule,
    breakpoint::ModuleNameAndOffset,
    error::DebugStopReason,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStoppedData {
    pub reason: DebugStopReason,
    /// Thread that caused the stop, when the back-end knows it.
    pub last_active_thread: u32,
    pub exit_code: u64,
    /// Adapter-specific payload.
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DebuggerEvent {
    Launch,
    Attach,
    Connect,
    Detach,
    QuitDebugging,

    Resume,
    StepInto,
    StepOver,
    StepReturn,

    TargetStopped(TargetStoppedData),
    TargetExited { exit_code: u64 },

    Error { text: String, short_text: String },
    InvalidOperation,
    InternalError,

    AbsoluteBreakpointAdded { address: u64 },
    AbsoluteBreakpointRemoved { address: u64 },
    RelativeBreakpointAdded(ModuleNameAndOffset),
    RelativeBreakpointRemoved(ModuleNameAndOffset),

    ActiveThreadChanged { tid: u32 },
    ModuleLoaded(DebugModule),
    ModuleUnloaded { address: u64 },

    StdoutMessage { text: String },
    InitialViewRebased { remote_base: u64 },
}

pub type DebuggerEventCallback = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;

struct Subscription {
    index: usize,
    name: String,
    callback: DebuggerEventCallback,
}

/// Registered callbacks, dispatched in registration order.
///
/// The subscriber list is snapshotted before dispatch, so callbacks are free
/// to register or remove subscriptions; changes take effect on the next
/// `post`.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_index: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, callback: DebuggerEventCallback) -> usize {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().unwrap().push(Subscription {
            index,
            name: name.to_string(),
            callback,
        });
        index
    }

    pub fn remove(&self, index: usize) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.index != index);
        subscriptions.len() != before
    }

    pub fn subscriber_names(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|subscription| subscription.name.clone())
            .collect()
    }

    pub fn post(&self, event: &DebuggerEvent) {
        let snapshot: Vec<DebuggerEventCallback> = {
            let subscriptions = self.subscriptions.lock().unwrap();
            subscriptions
                .iter()
                .map(|subscription| Arc::clone(&subscription.callback))
                .collect()
        };

        for callback in snapshot {
            callback(event);
        }
    }
}
