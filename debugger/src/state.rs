// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lazily-refreshed view over live target state.
//!
//! Each sub-cache is either dirty or a faithful copy of what the adapter
//! reported at the last stop. Reads refresh on demand; `mark_dirty` is O(1)
//! and is called by the controller after every resume/stop cycle. Address
//! translation between module-relative and absolute forms lives on the
//! module cache, next to the data it needs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex},
};

use fnv::FnvHashMap;
use host_api::BinaryView;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    adapter::{same_base_module, DebugAdapter, DebugModule, DebugRegister, DebugThread},
    breakpoint::{BreakpointRegistry, ModuleNameAndOffset},
    error::{ConnectionStatus, TargetStatus},
    queued::QueuedAdapter,
};

pub const METADATA_ADAPTER_TYPE: &str = "debugger.adapter_type";
pub const METADATA_COMMAND_LINE_ARGS: &str = "debugger.command_line_args";
pub const METADATA_INPUT_FILE: &str = "debugger.input_file";
pub const METADATA_EXECUTABLE_PATH: &str = "debugger.executable_path";
pub const METADATA_WORKING_DIRECTORY: &str = "debugger.working_directory";
pub const METADATA_TERMINAL_EMULATOR: &str = "debugger.terminal_emulator";
pub const METADATA_REMOTE_HOST: &str = "debugger.remote_host";
pub const METADATA_REMOTE_PORT: &str = "debugger.remote_port";
pub const METADATA_PID_ATTACH: &str = "debugger.pid_attach";

pub struct DebuggerModules {
    modules: Vec<DebugModule>,
    dirty: bool,
}

impl DebuggerModules {
    pub fn new() -> Self {
        DebuggerModules {
            modules: Vec::new(),
            dirty: true,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_modules(&mut self, mut modules: Vec<DebugModule>) {
        // Ascending base so "first match wins" is deterministic.
        modules.sort_by_key(|module| module.address);
        self.modules = modules;
        self.dirty = false;
    }

    pub fn all(&self) -> &[DebugModule] {
        &self.modules
    }

    /// Base of the module called `name`, matched on the full path, the short
    /// name, and finally the case-insensitive basename.
    pub fn module_base(&self, name: &str) -> Option<u64> {
        for module in &self.modules {
            if module.name == name || module.short_name == name {
                return Some(module.address);
            }
        }
        self.modules
            .iter()
            .find(|module| same_base_module(&module.name, name))
            .map(|module| module.address)
    }

    pub fn module_containing(&self, address: u64) -> Option<&DebugModule> {
        self.modules.iter().find(|module| module.contains(address))
    }

    pub fn relative_to_absolute(&self, relative: &ModuleNameAndOffset) -> Option<u64> {
        if relative.module.is_empty() {
            // Address that never resolved to a module; the offset is the
            // absolute address itself.
            return Some(relative.offset);
        }
        self.module_base(&relative.module)
            .map(|base| base.wrapping_add(relative.offset))
    }

    pub fn absolute_to_relative(&self, address: u64) -> Option<ModuleNameAndOffset> {
        self.module_containing(address)
            .map(|module| ModuleNameAndOffset::new(module.name.clone(), address - module.address))
    }
}

pub struct DebuggerThreads {
    threads: Vec<DebugThread>,
    active: Option<DebugThread>,
    dirty: bool,
}

impl DebuggerThreads {
    pub fn new() -> Self {
        DebuggerThreads {
            threads: Vec::new(),
            active: None,
            dirty: true,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_threads(&mut self, threads: Vec<DebugThread>, active: Option<DebugThread>) {
        self.threads = threads;
        self.active = active;
        self.dirty = false;
    }

    pub fn all(&self) -> &[DebugThread] {
        &self.threads
    }

    pub fn active(&self) -> Option<&DebugThread> {
        self.active.as_ref()
    }
}

pub struct DebuggerRegisters {
    registers: FnvHashMap<String, DebugRegister>,
    dirty: bool,
}

impl DebuggerRegisters {
    pub fn new() -> Self {
        DebuggerRegisters {
            registers: FnvHashMap::default(),
            dirty: true,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.registers.clear();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_registers(&mut self, registers: FnvHashMap<String, DebugRegister>) {
        self.registers = registers;
        self.dirty = false;
    }

    pub fn value(&self, name: &str) -> Option<u64> {
        self.registers.get(name).map(|register| register.value)
    }

    /// All registers in the back-end's display order.
    pub fn all(&self) -> Vec<DebugRegister> {
        let mut registers: Vec<DebugRegister> = self.registers.values().cloned().collect();
        registers.sort_by_key(|register| register.index);
        registers
    }
}

/// Launch configuration, persisted as metadata on the program image.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DebuggerConfig {
    pub adapter_type: String,
    pub executable_path: String,
    pub working_directory: String,
    pub command_line_args: String,
    pub input_file: String,
    pub remote_host: String,
    pub remote_port: u32,
    pub pid_attach: u32,
    pub request_terminal_emulator: bool,
    /// Adapter-specific properties, forwarded at launch.
    pub properties: BTreeMap<String, String>,
}

impl DebuggerConfig {
    fn load(view: &dyn BinaryView) -> Self {
        let string = |key: &str| {
            view.query_metadata(key)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        };
        let number = |key: &str| {
            view.query_metadata(key)
                .and_then(|v| v.as_u64())
                .unwrap_or_default()
        };

        let executable_path = {
            let path = string(METADATA_EXECUTABLE_PATH);
            if path.is_empty() {
                view.original_file_name()
            } else {
                path
            }
        };
        let input_file = {
            let file = string(METADATA_INPUT_FILE);
            if file.is_empty() {
                view.original_file_name()
            } else {
                file
            }
        };

        DebuggerConfig {
            adapter_type: string(METADATA_ADAPTER_TYPE),
            executable_path,
            working_directory: string(METADATA_WORKING_DIRECTORY),
            command_line_args: string(METADATA_COMMAND_LINE_ARGS),
            input_file,
            remote_host: string(METADATA_REMOTE_HOST),
            remote_port: number(METADATA_REMOTE_PORT) as u32,
            pid_attach: number(METADATA_PID_ATTACH) as u32,
            request_terminal_emulator: view
                .query_metadata(METADATA_TERMINAL_EMULATOR)
                .and_then(|v| v.as_bool())
                .unwrap_or_default(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct SessionStatus {
    connection: ConnectionStatus,
    target: TargetStatus,
}

/// Everything the controller knows about one debug session.
pub struct DebuggerState {
    view: Mutex<Arc<dyn BinaryView>>,
    adapter: Mutex<Option<Arc<QueuedAdapter>>>,

    status: Mutex<SessionStatus>,
    status_changed: Condvar,

    modules: Mutex<DebuggerModules>,
    threads: Mutex<DebuggerThreads>,
    registers: Mutex<DebuggerRegisters>,
    breakpoints: Mutex<BreakpointRegistry>,

    remote_arch: Mutex<Option<String>>,
    config: Mutex<DebuggerConfig>,
}

impl DebuggerState {
    pub fn new(view: Arc<dyn BinaryView>) -> Self {
        let config = DebuggerConfig::load(view.as_ref());
        DebuggerState {
            view: Mutex::new(view),
            adapter: Mutex::new(None),
            status: Mutex::new(SessionStatus::default()),
            status_changed: Condvar::new(),
            modules: Mutex::new(DebuggerModules::new()),
            threads: Mutex::new(DebuggerThreads::new()),
            registers: Mutex::new(DebuggerRegisters::new()),
            breakpoints: Mutex::new(BreakpointRegistry::new()),
            remote_arch: Mutex::new(None),
            config: Mutex::new(config),
        }
    }

    pub fn view(&self) -> Arc<dyn BinaryView> {
        Arc::clone(&self.view.lock().unwrap())
    }

    pub(crate) fn set_view(&self, view: Arc<dyn BinaryView>) {
        *self.view.lock().unwrap() = view;
    }

    pub fn adapter(&self) -> Option<Arc<QueuedAdapter>> {
        self.adapter.lock().unwrap().clone()
    }

    pub(crate) fn set_adapter(&self, adapter: Option<Arc<QueuedAdapter>>) {
        *self.adapter.lock().unwrap() = adapter;
        *self.remote_arch.lock().unwrap() = None;
    }

    // Status handling. The condvar wakes `pause_and_wait` when the thread
    // blocked in `go` observes the stop.

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status.lock().unwrap().connection
    }

    pub fn target_status(&self) -> TargetStatus {
        self.status.lock().unwrap().target
    }

    pub fn set_connection_status(&self, connection: ConnectionStatus) {
        self.status.lock().unwrap().connection = connection;
        self.status_changed.notify_all();
    }

    pub fn set_target_status(&self, target: TargetStatus) {
        self.status.lock().unwrap().target = target;
        self.status_changed.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    pub fn is_running(&self) -> bool {
        self.target_status() == TargetStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.target_status() == TargetStatus::Paused
    }

    pub fn wait_while_running(&self) {
        let mut status = self.status.lock().unwrap();
        while status.target == TargetStatus::Running {
            status = self.status_changed.wait(status).unwrap();
        }
    }

    // Cache maintenance.

    pub fn mark_dirty(&self) {
        self.modules.lock().unwrap().mark_dirty();
        self.threads.lock().unwrap().mark_dirty();
        self.registers.lock().unwrap().mark_dirty();
    }

    /// Force-refresh every cache from the adapter.
    pub fn update_caches(&self) {
        self.mark_dirty();
        self.refresh_modules();
        self.refresh_threads();
        self.refresh_registers();
    }

    fn refresh_modules(&self) {
        if !self.modules.lock().unwrap().is_dirty() {
            return;
        }
        let Some(adapter) = self.adapter() else {
            return;
        };
        let modules = adapter.modules();
        self.modules.lock().unwrap().set_modules(modules);
    }

    fn refresh_threads(&self) {
        if !self.threads.lock().unwrap().is_dirty() {
            return;
        }
        let Some(adapter) = self.adapter() else {
            return;
        };
        let threads = adapter.threads();
        let active = adapter.active_thread();
        self.threads.lock().unwrap().set_threads(threads, active);
    }

    fn refresh_registers(&self) {
        if !self.registers.lock().unwrap().is_dirty() {
            return;
        }
        let Some(adapter) = self.adapter() else {
            return;
        };
        let registers = adapter.read_all_registers();
        self.registers.lock().unwrap().set_registers(registers);
    }

    /// Runs `reader` against the refreshed module cache.
    pub fn with_modules<R>(&self, reader: impl FnOnce(&DebuggerModules) -> R) -> R {
        self.refresh_modules();
        reader(&self.modules.lock().unwrap())
    }

    pub fn with_threads<R>(&self, reader: impl FnOnce(&DebuggerThreads) -> R) -> R {
        self.refresh_threads();
        reader(&self.threads.lock().unwrap())
    }

    pub fn with_registers<R>(&self, reader: impl FnOnce(&DebuggerRegisters) -> R) -> R {
        self.refresh_registers();
        reader(&self.registers.lock().unwrap())
    }

    pub fn with_breakpoints<R>(&self, reader: impl FnOnce(&mut BreakpointRegistry) -> R) -> R {
        reader(&mut self.breakpoints.lock().unwrap())
    }

    /// Reinstalls every resolvable breakpoint and drops stale ones. The
    /// module cache must be fresh; lock order is modules before breakpoints.
    pub fn apply_breakpoints(&self) {
        let Some(adapter) = self.adapter() else {
            return;
        };
        self.refresh_modules();
        let modules = self.modules.lock().unwrap();
        self.breakpoints
            .lock()
            .unwrap()
            .apply_all(&modules, adapter.as_ref());
    }

    /// Whether a user breakpoint resolves to `address` right now.
    pub fn contains_absolute_breakpoint(&self, address: u64) -> bool {
        self.refresh_modules();
        let modules = self.modules.lock().unwrap();
        self.breakpoints
            .lock()
            .unwrap()
            .contains_absolute(&modules, address)
    }

    /// The stored breakpoint that resolves to `address`, if any.
    pub fn find_relative_breakpoint_for(&self, address: u64) -> Option<ModuleNameAndOffset> {
        self.refresh_modules();
        let modules = self.modules.lock().unwrap();
        self.breakpoints
            .lock()
            .unwrap()
            .find_relative_for(&modules, address)
    }

    // Register conveniences.

    pub fn remote_architecture(&self) -> String {
        if let Some(arch) = self.remote_arch.lock().unwrap().clone() {
            return arch;
        }
        let Some(adapter) = self.adapter() else {
            return String::new();
        };
        let arch = adapter.target_architecture();
        *self.remote_arch.lock().unwrap() = Some(arch.clone());
        arch
    }

    fn ip_register(&self) -> &'static str {
        match self.remote_architecture().as_str() {
            "x86_64" => "rip",
            "x86" => "eip",
            "aarch64" | "arm" | "armv7" => "pc",
            other => {
                if !other.is_empty() {
                    warn!("unknown architecture {}, assuming pc register", other);
                }
                "pc"
            }
        }
    }

    fn sp_register(&self) -> &'static str {
        match self.remote_architecture().as_str() {
            "x86_64" => "rsp",
            "x86" => "esp",
            _ => "sp",
        }
    }

    /// Instruction pointer of the active thread at the last stop.
    pub fn ip(&self) -> u64 {
        let register = self.ip_register();
        self.with_registers(|registers| registers.value(register))
            .unwrap_or_default()
    }

    pub fn stack_pointer(&self) -> u64 {
        let register = self.sp_register();
        self.with_registers(|registers| registers.value(register))
            .unwrap_or_default()
    }

    pub fn register_value(&self, name: &str) -> Option<u64> {
        self.with_registers(|registers| registers.value(name))
    }

    pub fn set_register(&self, name: &str, value: u64) -> bool {
        let Some(adapter) = self.adapter() else {
            return false;
        };
        let ok = adapter.write_register(name, value);
        if ok {
            self.registers.lock().unwrap().mark_dirty();
        }
        ok
    }

    pub fn set_ip(&self, value: u64) -> bool {
        let register = self.ip_register();
        self.set_register(register, value)
    }

    /// Base at which the main module is loaded in the live target, matched
    /// against the configured input file (falling back to the executable).
    pub fn remote_base(&self) -> Option<u64> {
        let (input_file, executable) = {
            let config = self.config.lock().unwrap();
            (config.input_file.clone(), config.executable_path.clone())
        };
        let name = if input_file.is_empty() {
            executable
        } else {
            input_file
        };
        self.with_modules(|modules| modules.module_base(&name))
    }

    // Configuration, persisted through view metadata.

    pub fn config(&self) -> DebuggerConfig {
        self.config.lock().unwrap().clone()
    }

    fn store_string(&self, key: &str, value: &str) {
        self.view().store_metadata(key, json!(value));
    }

    pub fn adapter_type(&self) -> String {
        self.config.lock().unwrap().adapter_type.clone()
    }

    pub fn set_adapter_type(&self, name: &str) {
        self.config.lock().unwrap().adapter_type = name.to_string();
        self.store_string(METADATA_ADAPTER_TYPE, name);
    }

    pub fn executable_path(&self) -> String {
        self.config.lock().unwrap().executable_path.clone()
    }

    pub fn set_executable_path(&self, path: &str) {
        self.config.lock().unwrap().executable_path = path.to_string();
        self.store_string(METADATA_EXECUTABLE_PATH, path);
    }

    pub fn working_directory(&self) -> String {
        self.config.lock().unwrap().working_directory.clone()
    }

    pub fn set_working_directory(&self, directory: &str) {
        self.config.lock().unwrap().working_directory = directory.to_string();
        self.store_string(METADATA_WORKING_DIRECTORY, directory);
    }

    pub fn command_line_arguments(&self) -> String {
        self.config.lock().unwrap().command_line_args.clone()
    }

    pub fn set_command_line_arguments(&self, args: &str) {
        self.config.lock().unwrap().command_line_args = args.to_string();
        self.store_string(METADATA_COMMAND_LINE_ARGS, args);
    }

    pub fn input_file(&self) -> String {
        self.config.lock().unwrap().input_file.clone()
    }

    pub fn set_input_file(&self, file: &str) {
        self.config.lock().unwrap().input_file = file.to_string();
        self.store_string(METADATA_INPUT_FILE, file);
    }

    pub fn remote_host(&self) -> String {
        self.config.lock().unwrap().remote_host.clone()
    }

    pub fn set_remote_host(&self, host: &str) {
        self.config.lock().unwrap().remote_host = host.to_string();
        self.store_string(METADATA_REMOTE_HOST, host);
    }

    pub fn remote_port(&self) -> u32 {
        self.config.lock().unwrap().remote_port
    }

    pub fn set_remote_port(&self, port: u32) {
        self.config.lock().unwrap().remote_port = port;
        self.view().store_metadata(METADATA_REMOTE_PORT, json!(port));
    }

    pub fn pid_attach(&self) -> u32 {
        self.config.lock().unwrap().pid_attach
    }

    pub fn set_pid_attach(&self, pid: u32) {
        self.config.lock().unwrap().pid_attach = pid;
        self.view().store_metadata(METADATA_PID_ATTACH, json!(pid));
    }

    pub fn request_terminal_emulator(&self) -> bool {
        self.config.lock().unwrap().request_terminal_emulator
    }

    pub fn set_request_terminal_emulator(&self, request: bool) {
        self.config.lock().unwrap().request_terminal_emulator = request;
        self.view()
            .store_metadata(METADATA_TERMINAL_EMULATOR, json!(request));
    }

    pub fn adapter_property(&self, key: &str) -> Option<String> {
        self.config.lock().unwrap().properties.get(key).cloned()
    }

    pub fn set_adapter_property(&self, key: &str, value: &str) {
        self.config
            .lock()
            .unwrap()
            .properties
            .insert(key.to_string(), value.to_string());
    }
}
