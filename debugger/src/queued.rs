// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serialization layer in front of a back-end adapter.
//!
//! Some OS debug APIs must be driven from the thread that created the
//! debugee, so every call is packaged as a task, executed by a single worker
//! in strict FIFO order, and the caller blocks on the result. `break_in`
//! goes straight to the adapter: the queued `go` is still occupying the
//! worker when a break is requested, and queueing behind it would deadlock.

use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
};

use fnv::FnvHashMap;
use log::trace;

use crate::{
    adapter::{
        AdapterCapability, DebugAdapter, DebugFrame, DebugModule, DebugRegister, DebugThread,
        LaunchConfig,
    },
    error::DebugStopReason,
    events::DebuggerEventCallback,
};

type Task = Box<dyn FnOnce() + Send>;

pub struct QueuedAdapter {
    inner: Arc<dyn DebugAdapter>,
    queue: Mutex<mpsc::Sender<Task>>,
}

impl QueuedAdapter {
    pub fn new(inner: Arc<dyn DebugAdapter>) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();

        thread::spawn(move || {
            // Exits when the owning QueuedAdapter drops its sender.
            for task in receiver {
                task();
            }
            trace!("adapter worker exiting");
        });

        QueuedAdapter {
            inner,
            queue: Mutex::new(sender),
        }
    }

    /// Runs `operation` on the worker and blocks for its result. Falls back
    /// to the default value if the worker is gone or the task died.
    fn enqueue<T, F>(&self, operation: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&dyn DebugAdapter) -> T + Send + 'static,
    {
        let adapter = Arc::clone(&self.inner);
        let (done, wait) = mpsc::channel();
        let task: Task = Box::new(move || {
            let _ = done.send(operation(adapter.as_ref()));
        });

        if self.queue.lock().unwrap().send(task).is_err() {
            return T::default();
        }
        wait.recv().unwrap_or_default()
    }
}

impl DebugAdapter for QueuedAdapter {
    fn execute(&self, path: &str, args: &str, working_dir: &str, configs: &LaunchConfig) -> bool {
        let (path, args, working_dir) = (path.to_string(), args.to_string(), working_dir.to_string());
        let configs = configs.clone();
        self.enqueue(move |adapter| adapter.execute(&path, &args, &working_dir, &configs))
    }

    fn attach(&self, pid: u32) -> bool {
        self.enqueue(move |adapter| adapter.attach(pid))
    }

    fn connect(&self, host: &str, port: u32) -> bool {
        let host = host.to_string();
        self.enqueue(move |adapter| adapter.connect(&host, port))
    }

    fn detach(&self) -> bool {
        self.enqueue(|adapter| adapter.detach())
    }

    fn quit(&self) -> bool {
        self.enqueue(|adapter| adapter.quit())
    }

    fn go(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.go())
    }

    fn step_into(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_into())
    }

    fn step_over(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_over())
    }

    fn step_return(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_return())
    }

    fn go_reverse(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.go_reverse())
    }

    fn step_into_reverse(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_into_reverse())
    }

    fn step_over_reverse(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_over_reverse())
    }

    fn step_return_reverse(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.step_return_reverse())
    }

    /// Must skip the queue; the blocked resume operation owns the worker.
    fn break_in(&self) -> bool {
        self.inner.break_in()
    }

    fn read_memory(&self, address: u64, size: usize) -> Vec<u8> {
        self.enqueue(move |adapter| adapter.read_memory(address, size))
    }

    fn write_memory(&self, address: u64, data: &[u8]) -> bool {
        let data = data.to_vec();
        self.enqueue(move |adapter| adapter.write_memory(address, &data))
    }

    fn read_all_registers(&self) -> FnvHashMap<String, DebugRegister> {
        self.enqueue(|adapter| adapter.read_all_registers())
    }

    fn read_register(&self, name: &str) -> Option<DebugRegister> {
        let name = name.to_string();
        self.enqueue(move |adapter| adapter.read_register(&name))
    }

    fn write_register(&self, name: &str, value: u64) -> bool {
        let name = name.to_string();
        self.enqueue(move |adapter| adapter.write_register(&name, value))
    }

    fn add_breakpoint(&self, address: u64) -> bool {
        self.enqueue(move |adapter| adapter.add_breakpoint(address))
    }

    fn remove_breakpoint(&self, address: u64) -> bool {
        self.enqueue(move |adapter| adapter.remove_breakpoint(address))
    }

    fn breakpoints(&self) -> Vec<u64> {
        self.enqueue(|adapter| adapter.breakpoints())
    }

    fn threads(&self) -> Vec<DebugThread> {
        self.enqueue(|adapter| adapter.threads())
    }

    fn active_thread(&self) -> Option<DebugThread> {
        self.enqueue(|adapter| adapter.active_thread())
    }

    fn set_active_thread(&self, tid: u32) -> bool {
        self.enqueue(move |adapter| adapter.set_active_thread(tid))
    }

    fn suspend_thread(&self, tid: u32) -> bool {
        self.enqueue(move |adapter| adapter.suspend_thread(tid))
    }

    fn resume_thread(&self, tid: u32) -> bool {
        self.enqueue(move |adapter| adapter.resume_thread(tid))
    }

    fn frames_of_thread(&self, tid: u32) -> Vec<DebugFrame> {
        self.enqueue(move |adapter| adapter.frames_of_thread(tid))
    }

    fn modules(&self) -> Vec<DebugModule> {
        self.enqueue(|adapter| adapter.modules())
    }

    fn target_architecture(&self) -> String {
        self.enqueue(|adapter| adapter.target_architecture())
    }

    fn exit_code(&self) -> u64 {
        self.enqueue(|adapter| adapter.exit_code())
    }

    fn stop_reason(&self) -> DebugStopReason {
        self.enqueue(|adapter| adapter.stop_reason())
    }

    fn supports(&self, capability: AdapterCapability) -> bool {
        self.inner.supports(capability)
    }

    /// Installed on the wrapped adapter; events originate there.
    fn set_event_callback(&self, callback: DebuggerEventCallback) {
        self.inner.set_event_callback(callback);
    }

    fn invoke_backend_command(&self, command: &str) -> String {
        self.inner.invoke_backend_command(command)
    }

    fn write_stdin(&self, text: &str) {
        self.inner.write_stdin(text);
    }
}
