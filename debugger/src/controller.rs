// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The orchestrator behind the uniform debug API.
//!
//! One controller exists per program image. It owns the session lifecycle,
//! the stepping algorithms, the rebase/snapshot handoff with the host, and
//! the translation of adapter events onto the event bus. Control operations
//! come in a blocking `_and_wait` form returning a stop reason and a
//! fire-and-forget form that spawns the blocking one.

use std::{
    fs,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc, Mutex, Weak,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use host_api::{BinaryView, Host, IlLevel, IlOperation, LiveMemoryReader};
use log::{error, info, warn};

use crate::{
    adapter::{
        AdapterCapability, DebugAdapter, DebugFrame, DebugModule, DebugRegister, DebugThread,
        LaunchConfig,
    },
    adapter_type,
    breakpoint::{BreakpointRegistry, ModuleNameAndOffset},
    error::{ConnectionStatus, DebugStopReason, DebuggerError, TargetStatus},
    events::{DebuggerEvent, DebuggerEventCallback, EventBus, TargetStoppedData},
    queued::QueuedAdapter,
    state::DebuggerState,
};

/// Upper bound on inner steps for one IL-level stepping request. A target
/// that never lands on an IL boundary within this many steps reports
/// `InternalError` instead of looping.
const MAX_IL_STEP_COUNT: usize = 10_000;

/// Module-relative location plus the name of the containing function, when
/// analysis knows one.
#[derive(Clone, Debug, Default)]
pub struct AddressInformation {
    pub relative: Option<ModuleNameAndOffset>,
    pub function_name: Option<String>,
}

pub struct DebuggerController {
    host: Arc<dyn Host>,
    state: Arc<DebuggerState>,
    events: EventBus,
    live_view: Mutex<Option<Arc<dyn BinaryView>>>,

    // Written from the event hook, read relaxed from API threads. Callers
    // that need a coherent snapshot go through `state` instead.
    current_ip: AtomicU64,
    last_ip: AtomicU64,
    exit_code: AtomicU64,
    user_requested_break: AtomicBool,
}

impl DebuggerController {
    /// Controllers are keyed by canonical image identity; use
    /// [`crate::registry::get_or_create`] instead of constructing directly.
    pub(crate) fn new(host: Arc<dyn Host>, view: Arc<dyn BinaryView>) -> Arc<Self> {
        let state = Arc::new(DebuggerState::new(Arc::clone(&view)));

        let controller = Arc::new_cyclic(|weak: &Weak<DebuggerController>| {
            let events = EventBus::new();
            let hook = weak.clone();
            events.register(
                "core",
                Arc::new(move |event: &DebuggerEvent| {
                    if let Some(controller) = hook.upgrade() {
                        controller.handle_event(event);
                    }
                }),
            );

            DebuggerController {
                host,
                state,
                events,
                live_view: Mutex::new(None),
                current_ip: AtomicU64::new(0),
                last_ip: AtomicU64::new(0),
                exit_code: AtomicU64::new(0),
                user_requested_break: AtomicBool::new(false),
            }
        });

        if controller.host.settings().get_bool("debugger.stopAtEntryPoint") {
            controller.add_entry_breakpoint(&view);
        }

        controller
    }

    fn add_entry_breakpoint(&self, view: &Arc<dyn BinaryView>) {
        let offset = view.entry_point().wrapping_sub(view.start());
        let breakpoint = ModuleNameAndOffset::new(view.original_file_name(), offset);
        self.add_relative_breakpoint(breakpoint);
    }

    pub fn state(&self) -> &Arc<DebuggerState> {
        &self.state
    }

    /// The static view; rebased in place once a session reports its load
    /// base.
    pub fn view(&self) -> Arc<dyn BinaryView> {
        self.state.view()
    }

    /// The snapshot view whose reads are serviced by the live target.
    pub fn live_view(&self) -> Option<Arc<dyn BinaryView>> {
        self.live_view.lock().unwrap().clone()
    }

    fn set_live_view(&self, view: Option<Arc<dyn BinaryView>>) {
        *self.live_view.lock().unwrap() = view;
    }

    // ------------------------------------------------------------------
    // Events.

    pub fn register_callback(&self, name: &str, callback: DebuggerEventCallback) -> usize {
        self.events.register(name, callback)
    }

    pub fn remove_callback(&self, index: usize) -> bool {
        self.events.remove(index)
    }

    /// Adapters deliver their asynchronous events through here.
    pub fn post_event(&self, event: DebuggerEvent) {
        self.events.post(&event);
    }

    fn post(&self, event: DebuggerEvent) {
        self.events.post(&event);
    }

    fn notify_stopped(&self, reason: DebugStopReason, data: Option<serde_json::Value>) {
        let last_active_thread = self
            .state
            .with_threads(|threads| threads.active().map(|thread| thread.tid))
            .unwrap_or_default();
        self.post(DebuggerEvent::TargetStopped(TargetStoppedData {
            reason,
            last_active_thread,
            exit_code: self.exit_code.load(Ordering::Relaxed),
            data,
        }));
    }

    fn notify_error(&self, error: &DebuggerError) {
        error!("{}", error);
        self.post(DebuggerEvent::Error {
            text: error.to_string(),
            short_text: error.short_tag().to_string(),
        });
    }

    /// Cache side effects of adapter and lifecycle events. Registered first,
    /// so bookkeeping runs before any external subscriber sees the event.
    fn handle_event(&self, event: &DebuggerEvent) {
        match event {
            DebuggerEvent::StdoutMessage { text } => {
                info!("{}", text);
            }
            DebuggerEvent::TargetStopped(_) => {
                self.last_ip
                    .store(self.current_ip.load(Ordering::Relaxed), Ordering::Relaxed);
                self.current_ip.store(self.state.ip(), Ordering::Relaxed);
            }
            DebuggerEvent::TargetExited { exit_code } => {
                self.exit_code.store(*exit_code, Ordering::Relaxed);
                self.teardown_session();
            }
            DebuggerEvent::ModuleLoaded(_) | DebuggerEvent::ModuleUnloaded { .. } => {
                self.state.mark_dirty();
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle.

    fn create_adapter(self: &Arc<Self>) -> Option<Arc<QueuedAdapter>> {
        let type_name = self.state.adapter_type();
        let Some(adapter_type) = adapter_type::get_by_name(&type_name) else {
            warn!("no debug adapter of type {:?}", type_name);
            return None;
        };

        let view = self.state.view();
        let Some(adapter) = adapter_type.create(&view) else {
            warn!("failed to create an adapter of type {:?}", type_name);
            return None;
        };

        let queued = Arc::new(QueuedAdapter::new(adapter));

        // Adapter events flow onto the bus; weak so a dangling adapter
        // cannot keep the controller alive.
        let hook = Arc::downgrade(self);
        queued.set_event_callback(Arc::new(move |event: &DebuggerEvent| {
            if let Some(controller) = hook.upgrade() {
                controller.post_event(event.clone());
            }
        }));

        Some(queued)
    }

    /// Hands the configured executable to the adapter.
    pub fn execute(&self) -> bool {
        let config = self.state.config();
        if let Err(error) = validate_executable(&config.executable_path) {
            warn!("cannot execute target: {:#}", error);
            return false;
        }

        let Some(adapter) = self.state.adapter() else {
            return false;
        };
        let launch = LaunchConfig {
            request_terminal_emulator: config.request_terminal_emulator,
            input_file: config.input_file.clone(),
            properties: config.properties.clone(),
        };
        adapter.execute(
            &config.executable_path,
            &config.command_line_args,
            &config.working_directory,
            &launch,
        )
    }

    pub fn launch_and_wait(self: &Arc<Self>) -> DebugStopReason {
        self.post(DebuggerEvent::Launch);

        let Some(adapter) = self.create_adapter() else {
            self.notify_error(&DebuggerError::LaunchFailed(self.state.adapter_type()));
            return DebugStopReason::InternalError;
        };
        self.state.set_adapter(Some(adapter));
        self.state.mark_dirty();

        if self.execute() {
            self.state.set_connection_status(ConnectionStatus::Connected);
            self.state.set_target_status(TargetStatus::Paused);
            self.handle_initial_stop();
            DebugStopReason::InitialBreakpoint
        } else {
            self.state.set_adapter(None);
            self.notify_error(&DebuggerError::LaunchFailed(self.state.executable_path()));
            DebugStopReason::InternalError
        }
    }

    pub fn launch(self: &Arc<Self>) -> bool {
        self.spawn(|controller| {
            controller.launch_and_wait();
        });
        true
    }

    pub fn attach_and_wait(self: &Arc<Self>, pid: u32) -> DebugStopReason {
        self.post(DebuggerEvent::Attach);

        let Some(adapter) = self.create_adapter() else {
            self.notify_error(&DebuggerError::LaunchFailed(self.state.adapter_type()));
            return DebugStopReason::InternalError;
        };
        self.state.set_adapter(Some(adapter.clone()));
        self.state.mark_dirty();

        if adapter.attach(pid) {
            self.state.set_connection_status(ConnectionStatus::Connected);
            self.state.set_target_status(TargetStatus::Paused);
            self.handle_initial_stop();
            DebugStopReason::InitialBreakpoint
        } else {
            self.state.set_adapter(None);
            self.notify_error(&DebuggerError::LaunchFailed(format!("pid {}", pid)));
            DebugStopReason::InternalError
        }
    }

    pub fn attach(self: &Arc<Self>, pid: u32) -> bool {
        self.spawn(move |controller| {
            controller.attach_and_wait(pid);
        });
        true
    }

    pub fn connect_and_wait(self: &Arc<Self>) -> DebugStopReason {
        if self.state.is_connected() {
            return DebugStopReason::InvalidStatusOrOperation;
        }

        let Some(adapter) = self.create_adapter() else {
            self.notify_error(&DebuggerError::LaunchFailed(self.state.adapter_type()));
            return DebugStopReason::InternalError;
        };
        self.state.set_adapter(Some(adapter.clone()));
        self.state.mark_dirty();
        self.state
            .set_connection_status(ConnectionStatus::Connecting);
        self.post(DebuggerEvent::Connect);

        let (host, port) = (self.state.remote_host(), self.state.remote_port());
        if adapter.connect(&host, port) {
            self.state.mark_dirty();
            self.state.set_connection_status(ConnectionStatus::Connected);
            self.state.set_target_status(TargetStatus::Paused);
            self.handle_initial_stop();
            DebugStopReason::InitialBreakpoint
        } else {
            self.state.set_adapter(None);
            self.state
                .set_connection_status(ConnectionStatus::NotConnected);
            self.notify_error(&DebuggerError::LaunchFailed(format!("{}:{}", host, port)));
            DebugStopReason::InternalError
        }
    }

    pub fn connect(self: &Arc<Self>) -> bool {
        self.spawn(|controller| {
            controller.connect_and_wait();
        });
        true
    }

    pub fn launch_or_connect(self: &Arc<Self>) -> bool {
        let Some(adapter_type) = adapter_type::get_by_name(&self.state.adapter_type()) else {
            return false;
        };
        let view = self.state.view();
        if adapter_type.can_execute(view.as_ref()) {
            self.launch_and_wait() == DebugStopReason::InitialBreakpoint
        } else if adapter_type.can_connect(view.as_ref()) {
            self.connect_and_wait() == DebugStopReason::InitialBreakpoint
        } else {
            false
        }
    }

    /// Brings caches, breakpoints, and the host views in line with the
    /// freshly-stopped target, then reports the initial stop.
    fn handle_initial_stop(self: &Arc<Self>) {
        self.state.update_caches();
        self.state.apply_breakpoints();

        let ip = self.state.ip();
        self.current_ip.store(ip, Ordering::Relaxed);
        self.last_ip.store(ip, Ordering::Relaxed);

        let data = self.state.view();
        let remote_base = self.state.remote_base().unwrap_or_else(|| data.start());

        if remote_base != data.start() {
            let host = Arc::clone(&self.host);
            let view = Arc::clone(&data);
            let (done, wait) = mpsc::channel();
            self.host
                .run_on_main_thread_and_wait(Box::new(move || {
                    let _ = done.send(host.rebase_view(&view, remote_base));
                }));
            match wait.recv().ok().flatten() {
                Some(rebased) => self.state.set_view(rebased),
                None => warn!("rebase to 0x{:x} failed", remote_base),
            }
        }

        let view = self.state.view();
        let reader: LiveMemoryReader = {
            let state = Arc::clone(&self.state);
            Arc::new(move |address, size| {
                state
                    .adapter()
                    .map(|adapter| adapter.read_memory(address, size))
                    .unwrap_or_default()
            })
        };
        let host = Arc::clone(&self.host);
        let (done, wait) = mpsc::channel();
        self.host
            .run_on_main_thread_and_wait(Box::new(move || {
                let _ = done.send(host.create_snapshot_view(&view, reader));
            }));
        match wait.recv().ok().flatten() {
            Some(snapshot) => self.set_live_view(Some(snapshot)),
            None => warn!("creating the debugger snapshot view failed"),
        }

        self.post(DebuggerEvent::InitialViewRebased { remote_base });
        self.notify_stopped(DebugStopReason::InitialBreakpoint, None);
    }

    fn teardown_session(&self) {
        self.state.mark_dirty();
        self.state.set_adapter(None);
        self.set_live_view(None);
        self.state
            .with_breakpoints(|breakpoints| breakpoints.clear_installed());
        self.state
            .set_connection_status(ConnectionStatus::NotConnected);
        self.state.set_target_status(TargetStatus::Invalid);
    }

    pub fn quit_and_wait(&self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        if self.state.is_running() {
            self.pause_internal();
        }
        let ok = self
            .state
            .adapter()
            .map(|adapter| adapter.quit())
            .unwrap_or(false);
        self.teardown_session();
        self.post(DebuggerEvent::QuitDebugging);
        ok
    }

    pub fn quit(self: &Arc<Self>) -> bool {
        self.spawn(|controller| {
            controller.quit_and_wait();
        });
        true
    }

    pub fn detach(&self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        self.post(DebuggerEvent::Detach);
        let ok = self
            .state
            .adapter()
            .map(|adapter| adapter.detach())
            .unwrap_or(false);
        self.teardown_session();
        ok
    }

    pub fn restart_and_wait(self: &Arc<Self>) -> DebugStopReason {
        self.quit_and_wait();
        thread::sleep(Duration::from_secs(1));
        self.launch_and_wait()
    }

    pub fn restart(self: &Arc<Self>) -> bool {
        self.spawn(|controller| {
            controller.restart_and_wait();
        });
        true
    }

    // ------------------------------------------------------------------
    // Break-in.

    fn pause_internal(&self) {
        if !self.state.is_running() {
            return;
        }
        // Tells the thread blocked in the resume operation to swallow its
        // stop; the pause path reports its own.
        self.user_requested_break.store(true, Ordering::SeqCst);
        if let Some(adapter) = self.state.adapter() {
            adapter.break_in();
        }
        self.state.wait_while_running();
    }

    pub fn pause_and_wait(&self) -> DebugStopReason {
        if !(self.state.is_connected() && self.state.is_running()) {
            return DebugStopReason::InvalidStatusOrOperation;
        }

        self.pause_internal();

        self.state.mark_dirty();
        // Transition through Invalid so every consumer refreshes.
        self.state.set_target_status(TargetStatus::Invalid);
        self.state.set_target_status(TargetStatus::Paused);
        self.notify_stopped(DebugStopReason::UserRequestedBreak, None);
        DebugStopReason::UserRequestedBreak
    }

    pub fn pause(self: &Arc<Self>) -> bool {
        self.spawn(|controller| {
            controller.pause_and_wait();
        });
        true
    }

    // ------------------------------------------------------------------
    // Stepping and resumption.

    pub fn can_resume(&self) -> bool {
        self.state.is_connected() && self.state.is_paused()
    }

    /// Status bracketing shared by every resume-class entry point. The
    /// matching event is posted after the target transitions to Running and
    /// strictly before the stop event.
    fn resume_wrapper(
        &self,
        event: DebuggerEvent,
        operation: impl FnOnce(&Self) -> DebugStopReason,
    ) -> DebugStopReason {
        if !self.can_resume() {
            return DebugStopReason::InvalidStatusOrOperation;
        }

        self.state.set_target_status(TargetStatus::Running);
        self.post(event);

        let reason = operation(self);

        self.state.mark_dirty();
        self.state.set_target_status(TargetStatus::Paused);
        self.handle_stop(reason);
        reason
    }

    fn handle_stop(&self, reason: DebugStopReason) {
        if self.user_requested_break.swap(false, Ordering::SeqCst) {
            // The pause path posts UserRequestedBreak itself.
            return;
        }

        match reason {
            DebugStopReason::ProcessExited => {
                let exit_code = self
                    .state
                    .adapter()
                    .map(|adapter| adapter.exit_code())
                    .unwrap_or_default();
                self.exit_code.store(exit_code, Ordering::Relaxed);
                self.post(DebuggerEvent::TargetExited { exit_code });
            }
            DebugStopReason::InternalError => self.post(DebuggerEvent::InternalError),
            DebugStopReason::InvalidStatusOrOperation => {
                self.post(DebuggerEvent::InvalidOperation)
            }
            _ => self.notify_stopped(reason, None),
        }
    }

    /// One adapter-level single step, eliding a user breakpoint under the
    /// current instruction so the target does not immediately re-trap.
    fn step_into_internal(&self) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };

        let ip = self.state.ip();
        let elide = !adapter.supports(AdapterCapability::AutoBreakpointElision)
            && self.state.contains_absolute_breakpoint(ip);

        let reason = if elide {
            adapter.remove_breakpoint(ip);
            let reason = adapter.step_into();
            adapter.add_breakpoint(ip);
            reason
        } else {
            adapter.step_into()
        };

        // The loops above us re-read the instruction pointer.
        self.state.mark_dirty();
        reason
    }

    /// Resume, first stepping off a user breakpoint at the current address
    /// unless the back-end does that dance itself.
    fn go_internal(&self) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };

        let ip = self.state.ip();
        if !adapter.supports(AdapterCapability::AutoBreakpointElision)
            && self.state.contains_absolute_breakpoint(ip)
        {
            let reason = self.step_into_internal();
            if !reason.is_expected_single_step() {
                return reason;
            }
        }

        let reason = adapter.go();
        self.state.mark_dirty();
        reason
    }

    /// Repeats `inner` until the instruction pointer lands on an
    /// instruction boundary of the requested IL.
    fn step_il_loop(
        &self,
        il: IlLevel,
        inner: impl Fn(&Self) -> DebugStopReason,
    ) -> DebugStopReason {
        for _ in 0..MAX_IL_STEP_COUNT {
            let reason = inner(self);
            if !reason.is_expected_single_step() {
                return reason;
            }

            let ip = self.state.ip();
            let Some(live_view) = self.live_view() else {
                return DebugStopReason::InternalError;
            };
            let functions = live_view.functions_containing(ip);
            if functions.is_empty() {
                return DebugStopReason::InternalError;
            }

            for function in functions {
                let Some(il_function) = function.il(il) else {
                    continue;
                };
                let on_boundary = match il {
                    // High-level IL has no positional index by address.
                    IlLevel::High => (0..il_function.instruction_count()).any(|index| {
                        il_function
                            .instruction(index)
                            .map(|instruction| instruction.address == ip)
                            .unwrap_or(false)
                    }),
                    _ => il_function
                        .instruction_start(ip)
                        .and_then(|index| il_function.instruction(index))
                        .map(|instruction| instruction.address == ip)
                        .unwrap_or(false),
                };
                if on_boundary {
                    return reason;
                }
            }
        }

        error!(
            "gave up aligning to an IL boundary after {} steps",
            MAX_IL_STEP_COUNT
        );
        DebugStopReason::InternalError
    }

    fn step_into_il(&self, il: IlLevel) -> DebugStopReason {
        match il {
            IlLevel::Normal => self.step_into_internal(),
            _ => self.step_il_loop(il, |controller| controller.step_into_internal()),
        }
    }

    /// Step over a call by running to the next instruction; everything else
    /// degrades to step-into.
    fn step_over_internal(&self) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };

        if adapter.supports(AdapterCapability::StepOver) {
            let reason = adapter.step_over();
            self.state.mark_dirty();
            return reason;
        }

        let ip = self.state.ip();
        let Some(arch) = self.state.view().default_architecture() else {
            return self.step_into_internal();
        };

        let data = adapter.read_memory(ip, arch.max_instruction_length());
        if data.is_empty() {
            return self.step_into_internal();
        }

        let is_call = arch
            .lift_instruction(&data, ip)
            .map(|instruction| instruction.operation == IlOperation::Call)
            .unwrap_or(false);
        if !is_call {
            return self.step_into_internal();
        }

        match arch.instruction_info(&data, ip) {
            Some(info) if info.length > 0 => {
                self.step_to_internal(&[ip.wrapping_add(info.length as u64)])
            }
            _ => self.step_into_internal(),
        }
    }

    fn step_over_il(&self, il: IlLevel) -> DebugStopReason {
        match il {
            IlLevel::Normal => self.step_over_internal(),
            _ => self.step_il_loop(il, |controller| controller.step_over_internal()),
        }
    }

    /// Run to every return site of the containing function.
    fn step_return_internal(&self) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };
        if adapter.supports(AdapterCapability::StepReturn) {
            let reason = adapter.step_return();
            self.state.mark_dirty();
            return reason;
        }

        let ip = self.state.ip();
        let Some(live_view) = self.live_view() else {
            return DebugStopReason::InternalError;
        };
        let functions = live_view.functions_containing(ip);
        let Some(function) = functions.first() else {
            return DebugStopReason::InternalError;
        };
        let Some(mlil) = function.il(IlLevel::Medium) else {
            return DebugStopReason::InternalError;
        };

        let mut return_addresses = Vec::new();
        for index in 0..mlil.instruction_count() {
            if let Some(instruction) = mlil.instruction(index) {
                if matches!(
                    instruction.operation,
                    IlOperation::Return | IlOperation::TailCall
                ) {
                    return_addresses.push(instruction.address);
                }
            }
        }

        self.step_to_internal(&return_addresses)
    }

    /// Run with temporary breakpoints at `addresses`; user breakpoints
    /// already covering an address are left alone.
    fn step_to_internal(&self, addresses: &[u64]) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };

        let mut temporary = Vec::new();
        for &address in addresses {
            if !self.state.contains_absolute_breakpoint(address) {
                adapter.add_breakpoint(address);
                temporary.push(address);
            }
        }

        let reason = self.go_internal();

        for address in temporary {
            adapter.remove_breakpoint(address);
        }
        reason
    }

    fn reverse_internal(
        &self,
        operation: impl FnOnce(&QueuedAdapter) -> DebugStopReason,
    ) -> DebugStopReason {
        let Some(adapter) = self.state.adapter() else {
            return DebugStopReason::InvalidStatusOrOperation;
        };
        if !adapter.supports(AdapterCapability::ReverseExecution) {
            return DebugStopReason::InvalidStatusOrOperation;
        }
        let reason = operation(adapter.as_ref());
        self.state.mark_dirty();
        reason
    }

    pub fn go_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::Resume, |controller| controller.go_internal())
    }

    pub fn go(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.go_and_wait();
        });
        true
    }

    pub fn step_into_and_wait(&self, il: IlLevel) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepInto, |controller| {
            controller.step_into_il(il)
        })
    }

    pub fn step_into(self: &Arc<Self>, il: IlLevel) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(move |controller| {
            controller.step_into_and_wait(il);
        });
        true
    }

    pub fn step_over_and_wait(&self, il: IlLevel) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepOver, |controller| {
            controller.step_over_il(il)
        })
    }

    pub fn step_over(self: &Arc<Self>, il: IlLevel) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(move |controller| {
            controller.step_over_and_wait(il);
        });
        true
    }

    pub fn step_return_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepReturn, |controller| {
            controller.step_return_internal()
        })
    }

    pub fn step_return(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.step_return_and_wait();
        });
        true
    }

    pub fn run_to_and_wait(&self, addresses: &[u64]) -> DebugStopReason {
        let addresses = addresses.to_vec();
        self.resume_wrapper(DebuggerEvent::Resume, move |controller| {
            controller.step_to_internal(&addresses)
        })
    }

    pub fn run_to(self: &Arc<Self>, addresses: &[u64]) -> bool {
        if !self.can_resume() {
            return false;
        }
        let addresses = addresses.to_vec();
        self.spawn(move |controller| {
            controller.run_to_and_wait(&addresses);
        });
        true
    }

    pub fn go_reverse_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::Resume, |controller| {
            controller.reverse_internal(|adapter| adapter.go_reverse())
        })
    }

    pub fn step_into_reverse_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepInto, |controller| {
            controller.reverse_internal(|adapter| adapter.step_into_reverse())
        })
    }

    pub fn step_over_reverse_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepOver, |controller| {
            controller.reverse_internal(|adapter| adapter.step_over_reverse())
        })
    }

    pub fn step_return_reverse_and_wait(&self) -> DebugStopReason {
        self.resume_wrapper(DebuggerEvent::StepReturn, |controller| {
            controller.reverse_internal(|adapter| adapter.step_return_reverse())
        })
    }

    pub fn go_reverse(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.go_reverse_and_wait();
        });
        true
    }

    pub fn step_into_reverse(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.step_into_reverse_and_wait();
        });
        true
    }

    pub fn step_over_reverse(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.step_over_reverse_and_wait();
        });
        true
    }

    pub fn step_return_reverse(self: &Arc<Self>) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.spawn(|controller| {
            controller.step_return_reverse_and_wait();
        });
        true
    }

    fn spawn(self: &Arc<Self>, operation: impl FnOnce(&Arc<DebuggerController>) + Send + 'static) {
        let controller = Arc::clone(self);
        thread::spawn(move || operation(&controller));
    }

    // ------------------------------------------------------------------
    // Introspection.

    /// Serviced by the snapshot view, which reads through to the live
    /// target. Empty when no session is active.
    pub fn read_memory(&self, address: u64, size: usize) -> Vec<u8> {
        match self.live_view() {
            Some(view) => view.read(address, size),
            None => Vec::new(),
        }
    }

    pub fn write_memory(&self, address: u64, data: &[u8]) -> bool {
        match self.live_view() {
            Some(view) => view.write(address, data) == data.len(),
            None => false,
        }
    }

    pub fn threads(&self) -> Vec<DebugThread> {
        self.state.with_threads(|threads| threads.all().to_vec())
    }

    pub fn active_thread(&self) -> Option<DebugThread> {
        self.state.with_threads(|threads| threads.active().cloned())
    }

    pub fn set_active_thread(&self, tid: u32) -> bool {
        let Some(adapter) = self.state.adapter() else {
            return false;
        };
        if !adapter.set_active_thread(tid) {
            return false;
        }
        // Register values are per thread.
        self.state.mark_dirty();
        self.post(DebuggerEvent::ActiveThreadChanged { tid });
        true
    }

    pub fn suspend_thread(&self, tid: u32) -> bool {
        let Some(adapter) = self.state.adapter() else {
            return false;
        };
        let ok = adapter.suspend_thread(tid);
        if ok {
            self.state.mark_dirty();
        }
        ok
    }

    pub fn resume_thread(&self, tid: u32) -> bool {
        let Some(adapter) = self.state.adapter() else {
            return false;
        };
        let ok = adapter.resume_thread(tid);
        if ok {
            self.state.mark_dirty();
        }
        ok
    }

    pub fn frames_of_thread(&self, tid: u32) -> Vec<DebugFrame> {
        self.state
            .adapter()
            .map(|adapter| adapter.frames_of_thread(tid))
            .unwrap_or_default()
    }

    pub fn modules(&self) -> Vec<DebugModule> {
        self.state.with_modules(|modules| modules.all().to_vec())
    }

    pub fn registers(&self) -> Vec<DebugRegister> {
        self.state.with_registers(|registers| registers.all())
    }

    pub fn get_register(&self, name: &str) -> Option<u64> {
        self.state.register_value(name)
    }

    pub fn set_register(&self, name: &str, value: u64) -> bool {
        self.state.set_register(name, value)
    }

    /// Instruction pointer at the last stop.
    pub fn ip(&self) -> u64 {
        self.current_ip.load(Ordering::Relaxed)
    }

    /// Instruction pointer at the stop before the last one.
    pub fn last_ip(&self) -> u64 {
        self.last_ip.load(Ordering::Relaxed)
    }

    pub fn set_ip(&self, value: u64) -> bool {
        if !self.state.set_ip(value) {
            return false;
        }
        self.current_ip.store(value, Ordering::Relaxed);
        true
    }

    pub fn stack_pointer(&self) -> u64 {
        self.state.stack_pointer()
    }

    pub fn exit_code(&self) -> u64 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub fn stop_reason(&self) -> DebugStopReason {
        self.state
            .adapter()
            .map(|adapter| adapter.stop_reason())
            .unwrap_or_default()
    }

    pub fn target_architecture(&self) -> String {
        self.state.remote_architecture()
    }

    pub fn address_information(&self, address: u64) -> AddressInformation {
        let relative = self
            .state
            .with_modules(|modules| modules.absolute_to_relative(address));
        let function_name = self.live_view().and_then(|view| {
            view.functions_containing(address)
                .first()
                .map(|function| function.name())
        });
        AddressInformation {
            relative,
            function_name,
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.connection_status()
    }

    pub fn target_status(&self) -> TargetStatus {
        self.state.target_status()
    }

    // ------------------------------------------------------------------
    // Breakpoints.

    pub fn add_relative_breakpoint(&self, breakpoint: ModuleNameAndOffset) -> bool {
        let added = self
            .state
            .with_breakpoints(|breakpoints| breakpoints.add_relative(breakpoint.clone()));
        if !added {
            return false;
        }

        if self.state.is_connected() && self.state.is_paused() {
            if let Some(address) = self
                .state
                .with_modules(|modules| modules.relative_to_absolute(&breakpoint))
            {
                if let Some(adapter) = self.state.adapter() {
                    adapter.add_breakpoint(address);
                    self.state
                        .with_breakpoints(|breakpoints| breakpoints.note_installed(address));
                }
            }
        }

        self.post(DebuggerEvent::RelativeBreakpointAdded(breakpoint));
        true
    }

    pub fn add_absolute_breakpoint(&self, address: u64) -> bool {
        let relative = self
            .state
            .with_modules(|modules| BreakpointRegistry::relative_for_absolute(modules, address));
        let added = self
            .state
            .with_breakpoints(|breakpoints| breakpoints.add_relative(relative));
        if !added {
            return false;
        }

        if self.state.is_connected() && self.state.is_paused() {
            if let Some(adapter) = self.state.adapter() {
                adapter.add_breakpoint(address);
                self.state
                    .with_breakpoints(|breakpoints| breakpoints.note_installed(address));
            }
        }

        self.post(DebuggerEvent::AbsoluteBreakpointAdded { address });
        true
    }

    pub fn delete_relative_breakpoint(&self, breakpoint: &ModuleNameAndOffset) -> bool {
        let removed = self
            .state
            .with_breakpoints(|breakpoints| breakpoints.remove_relative(breakpoint));
        if !removed {
            return false;
        }

        if let Some(address) = self
            .state
            .with_modules(|modules| modules.relative_to_absolute(breakpoint))
        {
            let installed = self
                .state
                .with_breakpoints(|breakpoints| breakpoints.is_installed(address));
            if installed {
                if let Some(adapter) = self.state.adapter() {
                    adapter.remove_breakpoint(address);
                }
                self.state
                    .with_breakpoints(|breakpoints| breakpoints.note_removed(address));
            }
        }

        self.post(DebuggerEvent::RelativeBreakpointRemoved(breakpoint.clone()));
        true
    }

    pub fn delete_absolute_breakpoint(&self, address: u64) -> bool {
        let Some(relative) = self.state.find_relative_breakpoint_for(address) else {
            return false;
        };
        let removed = self
            .state
            .with_breakpoints(|breakpoints| breakpoints.remove_relative(&relative));
        if !removed {
            return false;
        }

        let installed = self
            .state
            .with_breakpoints(|breakpoints| breakpoints.is_installed(address));
        if installed {
            if let Some(adapter) = self.state.adapter() {
                adapter.remove_breakpoint(address);
            }
            self.state
                .with_breakpoints(|breakpoints| breakpoints.note_removed(address));
        }

        self.post(DebuggerEvent::AbsoluteBreakpointRemoved { address });
        true
    }

    pub fn contains_relative_breakpoint(&self, breakpoint: &ModuleNameAndOffset) -> bool {
        self.state
            .with_breakpoints(|breakpoints| breakpoints.contains_relative(breakpoint))
    }

    pub fn contains_absolute_breakpoint(&self, address: u64) -> bool {
        self.state.contains_absolute_breakpoint(address)
    }

    pub fn breakpoints(&self) -> Vec<ModuleNameAndOffset> {
        self.state.with_breakpoints(|breakpoints| breakpoints.relatives())
    }

    // ------------------------------------------------------------------
    // Address translation.

    pub fn relative_to_absolute(&self, relative: &ModuleNameAndOffset) -> Option<u64> {
        self.state
            .with_modules(|modules| modules.relative_to_absolute(relative))
    }

    pub fn absolute_to_relative(&self, address: u64) -> Option<ModuleNameAndOffset> {
        self.state
            .with_modules(|modules| modules.absolute_to_relative(address))
    }

    // ------------------------------------------------------------------
    // Back-end passthrough.

    pub fn invoke_backend_command(&self, command: &str) -> String {
        self.state
            .adapter()
            .map(|adapter| adapter.invoke_backend_command(command))
            .unwrap_or_default()
    }

    pub fn write_stdin(&self, text: &str) {
        if let Some(adapter) = self.state.adapter() {
            adapter.write_stdin(text);
        }
    }
}

fn validate_executable(path: &str) -> anyhow::Result<()> {
    let metadata = fs::metadata(path).with_context(|| format!("cannot stat {:?}", path))?;
    if !metadata.is_file() {
        anyhow::bail!("{:?} is not a regular file", path);
    }
    Ok(())
}
