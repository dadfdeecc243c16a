// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code)]

//! A scriptable in-process debug target.
//!
//! The mock "OS" executes a one-byte instruction set over a loaded image:
//! `0x90` nop, `0xEB disp8` jump, `0xE8 off32` call (module-relative
//! target), `0xC3` return, `0xF4` halt. The mock adapter drives it through
//! the real adapter contract, so every test exercises the same code paths a
//! production back-end would.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use debugger::{
    AdapterCapability, DebugAdapter, DebugAdapterType, DebugFrame, DebugModule, DebugRegister,
    DebugStopReason, DebugThread, DebuggerEventCallback, LaunchConfig,
};
use fnv::FnvHashMap;
use host_api::{
    Architecture, BinaryView, Function, Host, IlFunction, IlInstruction, IlLevel, IlOperation,
    InstructionInfo, LiveMemoryReader, MetadataStore, SettingsRegistry,
};
use serde_json::Value;

pub const MOCK_TID: u32 = 1000;
pub const STACK_TOP: u64 = 0x7ffe_0000_0000;

/// Opt-in logging for test debugging (`RUST_LOG=trace cargo test`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Program description.

#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    /// Offsets from the image base.
    pub start: u64,
    pub end: u64,
    /// IL instruction offsets per level.
    pub il: Vec<(IlLevel, Vec<(u64, IlOperation)>)>,
}

pub struct ProgramSpec {
    pub file_name: String,
    pub content: Vec<u8>,
    pub static_base: u64,
    pub load_base: u64,
    pub entry_offset: u64,
    pub functions: Vec<FunctionSpec>,
}

impl ProgramSpec {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Image with a nop sled from the entry to a call site, a callee, and a
/// halt. Layout (offsets): entry at 0x100, `call 0x2000` at 0x1000, nop at
/// 0x1005, halt at 0x1006, callee `nop; ret` at 0x2000.
pub fn call_program(file_name: &str, static_base: u64, load_base: u64) -> ProgramSpec {
    let mut content = vec![0x90u8; 0x3000];
    content[0x1000] = 0xE8;
    content[0x1001..0x1005].copy_from_slice(&0x2000u32.to_le_bytes());
    content[0x1006] = 0xF4;
    content[0x2001] = 0xC3;

    let low_boundaries: Vec<(u64, IlOperation)> = (0..0x400)
        .map(|index| (0x100 + index * 4, IlOperation::Other))
        .collect();

    ProgramSpec {
        file_name: file_name.to_string(),
        content,
        static_base,
        load_base,
        entry_offset: 0x100,
        functions: vec![
            FunctionSpec {
                name: "main".to_string(),
                start: 0x100,
                end: 0x1007,
                il: vec![(IlLevel::Low, low_boundaries)],
            },
            FunctionSpec {
                name: "callee".to_string(),
                start: 0x2000,
                end: 0x2002,
                il: vec![(
                    IlLevel::Medium,
                    vec![(0x2000, IlOperation::Other), (0x2001, IlOperation::Return)],
                )],
            },
        ],
    }
}

/// Image that spins at the entry point forever: `jmp $`.
pub fn looping_program(file_name: &str, base: u64) -> ProgramSpec {
    let mut content = vec![0x90u8; 0x1000];
    content[0x100] = 0xEB;
    content[0x101] = 0xFE;

    ProgramSpec {
        file_name: file_name.to_string(),
        content,
        static_base: base,
        load_base: base,
        entry_offset: 0x100,
        functions: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// The mock OS process.

pub struct MockProcess {
    pub modules: Vec<(DebugModule, Vec<u8>)>,
    pub ip: u64,
    pub call_stack: Vec<u64>,
    pub breakpoints: BTreeSet<u64>,
    pub exited: bool,
    pub exit_code: u64,
    pub last_stop: DebugStopReason,
}

impl MockProcess {
    fn new(spec: &ProgramSpec) -> Self {
        let module = DebugModule::new(spec.file_name.clone(), spec.load_base, spec.size());
        MockProcess {
            modules: vec![(module, spec.content.clone())],
            ip: spec.load_base + spec.entry_offset,
            call_stack: Vec::new(),
            breakpoints: BTreeSet::new(),
            exited: false,
            exit_code: 0,
            last_stop: DebugStopReason::InitialBreakpoint,
        }
    }

    pub fn read(&self, address: u64, size: usize) -> Vec<u8> {
        for (module, bytes) in &self.modules {
            if module.contains(address) {
                let offset = (address - module.address) as usize;
                let end = bytes.len().min(offset + size);
                return bytes[offset..end].to_vec();
            }
        }
        Vec::new()
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> bool {
        for (module, bytes) in &mut self.modules {
            if module.contains(address) {
                let offset = (address - module.address) as usize;
                if offset + data.len() > bytes.len() {
                    return false;
                }
                bytes[offset..offset + data.len()].copy_from_slice(data);
                return true;
            }
        }
        false
    }

    fn module_base_of(&self, address: u64) -> Option<u64> {
        self.modules
            .iter()
            .find(|(module, _)| module.contains(address))
            .map(|(module, _)| module.address)
    }

    fn step(&mut self) {
        let Some(opcode) = self.read(self.ip, 1).first().copied() else {
            self.exited = true;
            return;
        };

        match opcode {
            0xEB => {
                let displacement = self.read(self.ip + 1, 1).first().copied().unwrap_or(0) as i8;
                self.ip = self
                    .ip
                    .wrapping_add(2)
                    .wrapping_add(displacement as i64 as u64);
            }
            0xE8 => {
                let bytes = self.read(self.ip + 1, 4);
                if bytes.len() == 4 {
                    let target =
                        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
                    let base = self.module_base_of(self.ip).unwrap_or(0);
                    self.call_stack.push(self.ip + 5);
                    self.ip = base + target;
                } else {
                    self.ip += 5;
                }
            }
            0xC3 => match self.call_stack.pop() {
                Some(return_address) => self.ip = return_address,
                None => self.exited = true,
            },
            0xF4 => self.exited = true,
            _ => self.ip += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// The mock adapter.

pub struct MockAdapter {
    process: Arc<Mutex<MockProcess>>,
    break_requested: AtomicBool,
    callback: Mutex<Option<DebuggerEventCallback>>,
    capabilities: Vec<AdapterCapability>,
}

impl MockAdapter {
    fn new(spec: &ProgramSpec, capabilities: Vec<AdapterCapability>) -> Self {
        MockAdapter {
            process: Arc::new(Mutex::new(MockProcess::new(spec))),
            break_requested: AtomicBool::new(false),
            callback: Mutex::new(None),
            capabilities,
        }
    }

    pub fn process(&self) -> Arc<Mutex<MockProcess>> {
        Arc::clone(&self.process)
    }

    fn finish_stop(&self, reason: DebugStopReason) -> DebugStopReason {
        self.process.lock().unwrap().last_stop = reason;
        reason
    }
}

impl DebugAdapter for MockAdapter {
    fn execute(&self, _path: &str, _args: &str, _working_dir: &str, _configs: &LaunchConfig) -> bool {
        true
    }

    fn detach(&self) -> bool {
        true
    }

    fn quit(&self) -> bool {
        let mut process = self.process.lock().unwrap();
        process.exited = true;
        true
    }

    fn go(&self) -> DebugStopReason {
        // A software breakpoint under the current instruction traps again
        // without making progress, exactly like a real int3.
        {
            let process = self.process.lock().unwrap();
            if !process.exited && process.breakpoints.contains(&process.ip) {
                drop(process);
                return self.finish_stop(DebugStopReason::Breakpoint);
            }
        }

        loop {
            if self.break_requested.swap(false, Ordering::SeqCst) {
                return self.finish_stop(DebugStopReason::UserRequestedBreak);
            }

            let mut process = self.process.lock().unwrap();
            if process.exited {
                drop(process);
                return self.finish_stop(DebugStopReason::ProcessExited);
            }
            process.step();
            if process.exited {
                drop(process);
                return self.finish_stop(DebugStopReason::ProcessExited);
            }
            if process.breakpoints.contains(&process.ip) {
                drop(process);
                return self.finish_stop(DebugStopReason::Breakpoint);
            }
        }
    }

    fn step_into(&self) -> DebugStopReason {
        let mut process = self.process.lock().unwrap();
        if process.exited {
            drop(process);
            return self.finish_stop(DebugStopReason::ProcessExited);
        }
        process.step();
        let exited = process.exited;
        drop(process);
        if exited {
            self.finish_stop(DebugStopReason::ProcessExited)
        } else {
            self.finish_stop(DebugStopReason::SingleStep)
        }
    }

    fn break_in(&self) -> bool {
        self.break_requested.store(true, Ordering::SeqCst);
        true
    }

    fn read_memory(&self, address: u64, size: usize) -> Vec<u8> {
        self.process.lock().unwrap().read(address, size)
    }

    fn write_memory(&self, address: u64, data: &[u8]) -> bool {
        self.process.lock().unwrap().write(address, data)
    }

    fn read_all_registers(&self) -> FnvHashMap<String, DebugRegister> {
        let process = self.process.lock().unwrap();
        let mut registers = FnvHashMap::default();
        registers.insert(
            "rip".to_string(),
            DebugRegister::new("rip", process.ip, 64, 0),
        );
        registers.insert(
            "rsp".to_string(),
            DebugRegister::new(
                "rsp",
                STACK_TOP - 8 * process.call_stack.len() as u64,
                64,
                1,
            ),
        );
        registers
    }

    fn read_register(&self, name: &str) -> Option<DebugRegister> {
        self.read_all_registers().get(name).cloned()
    }

    fn write_register(&self, name: &str, value: u64) -> bool {
        if name == "rip" {
            self.process.lock().unwrap().ip = value;
            true
        } else {
            false
        }
    }

    fn add_breakpoint(&self, address: u64) -> bool {
        self.process.lock().unwrap().breakpoints.insert(address)
    }

    fn remove_breakpoint(&self, address: u64) -> bool {
        self.process.lock().unwrap().breakpoints.remove(&address)
    }

    fn breakpoints(&self) -> Vec<u64> {
        self.process
            .lock()
            .unwrap()
            .breakpoints
            .iter()
            .copied()
            .collect()
    }

    fn threads(&self) -> Vec<DebugThread> {
        let process = self.process.lock().unwrap();
        vec![DebugThread::new(MOCK_TID, process.ip)]
    }

    fn active_thread(&self) -> Option<DebugThread> {
        let process = self.process.lock().unwrap();
        Some(DebugThread::new(MOCK_TID, process.ip))
    }

    fn set_active_thread(&self, tid: u32) -> bool {
        tid == MOCK_TID
    }

    fn frames_of_thread(&self, tid: u32) -> Vec<DebugFrame> {
        if tid != MOCK_TID {
            return Vec::new();
        }
        let process = self.process.lock().unwrap();
        let mut frames = vec![DebugFrame {
            index: 0,
            pc: process.ip,
            sp: STACK_TOP - 8 * process.call_stack.len() as u64,
            fp: 0,
            function_name: String::new(),
            function_start: 0,
            module: String::new(),
        }];
        for (depth, return_address) in process.call_stack.iter().rev().enumerate() {
            frames.push(DebugFrame {
                index: depth + 1,
                pc: *return_address,
                sp: STACK_TOP - 8 * (process.call_stack.len() - depth - 1) as u64,
                fp: 0,
                function_name: String::new(),
                function_start: 0,
                module: String::new(),
            });
        }
        frames
    }

    fn modules(&self) -> Vec<DebugModule> {
        self.process
            .lock()
            .unwrap()
            .modules
            .iter()
            .map(|(module, _)| module.clone())
            .collect()
    }

    fn target_architecture(&self) -> String {
        "x86_64".to_string()
    }

    fn exit_code(&self) -> u64 {
        self.process.lock().unwrap().exit_code
    }

    fn stop_reason(&self) -> DebugStopReason {
        self.process.lock().unwrap().last_stop
    }

    fn supports(&self, capability: AdapterCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn set_event_callback(&self, callback: DebuggerEventCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}

// ---------------------------------------------------------------------------
// The mock adapter type.

pub struct MockAdapterType {
    name: String,
    spec: Arc<ProgramSpec>,
    capabilities: Vec<AdapterCapability>,
    last_process: Mutex<Option<Arc<Mutex<MockProcess>>>>,
}

impl MockAdapterType {
    pub fn register(
        name: &str,
        spec: Arc<ProgramSpec>,
        capabilities: Vec<AdapterCapability>,
    ) -> Arc<MockAdapterType> {
        let adapter_type = Arc::new(MockAdapterType {
            name: name.to_string(),
            spec,
            capabilities,
            last_process: Mutex::new(None),
        });
        debugger::adapter_type::register(adapter_type.clone());
        adapter_type
    }

    /// The process created by the most recent launch.
    pub fn process(&self) -> Arc<Mutex<MockProcess>> {
        self.last_process
            .lock()
            .unwrap()
            .clone()
            .expect("no mock process launched yet")
    }
}

impl DebugAdapterType for MockAdapterType {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_valid_for(&self, _view: &dyn BinaryView) -> bool {
        true
    }

    fn can_execute(&self, _view: &dyn BinaryView) -> bool {
        true
    }

    fn can_connect(&self, _view: &dyn BinaryView) -> bool {
        false
    }

    fn create(&self, _view: &Arc<dyn BinaryView>) -> Option<Arc<dyn DebugAdapter>> {
        let adapter = Arc::new(MockAdapter::new(&self.spec, self.capabilities.clone()));
        *self.last_process.lock().unwrap() = Some(adapter.process());
        Some(adapter)
    }
}

// ---------------------------------------------------------------------------
// The mock host: views, IL, architecture, settings.

struct MockIlFunction {
    instructions: Vec<IlInstruction>,
}

impl IlFunction for MockIlFunction {
    fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    fn instruction(&self, index: usize) -> Option<IlInstruction> {
        self.instructions.get(index).copied()
    }

    fn instruction_start(&self, address: u64) -> Option<usize> {
        self.instructions
            .iter()
            .position(|instruction| instruction.address == address)
    }
}

struct MockFunction {
    name: String,
    start: u64,
    il: Vec<(IlLevel, Vec<IlInstruction>)>,
}

impl Function for MockFunction {
    fn start(&self) -> u64 {
        self.start
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn il(&self, level: IlLevel) -> Option<Arc<dyn IlFunction>> {
        self.il
            .iter()
            .find(|(il_level, _)| *il_level == level)
            .map(|(_, instructions)| {
                Arc::new(MockIlFunction {
                    instructions: instructions.clone(),
                }) as Arc<dyn IlFunction>
            })
    }
}

pub struct MockArch;

impl Architecture for MockArch {
    fn name(&self) -> String {
        "x86_64".to_string()
    }

    fn max_instruction_length(&self) -> usize {
        5
    }

    fn instruction_info(&self, data: &[u8], _address: u64) -> Option<InstructionInfo> {
        let length = match data.first()? {
            0xEB => 2,
            0xE8 => 5,
            _ => 1,
        };
        Some(InstructionInfo { length })
    }

    fn lift_instruction(&self, data: &[u8], address: u64) -> Option<IlInstruction> {
        let operation = match data.first()? {
            0xE8 => IlOperation::Call,
            0xC3 => IlOperation::Return,
            _ => IlOperation::Other,
        };
        Some(IlInstruction { address, operation })
    }
}

pub struct MockView {
    spec: Arc<ProgramSpec>,
    base: u64,
    file_name: String,
    parent: Option<String>,
    metadata: Arc<MetadataStore>,
}

impl MockView {
    fn functions_at(&self, address: u64) -> Vec<Arc<dyn Function>> {
        let mut functions: Vec<Arc<dyn Function>> = Vec::new();
        for spec in &self.spec.functions {
            let start = self.base + spec.start;
            let end = self.base + spec.end;
            if address >= start && address < end {
                functions.push(Arc::new(MockFunction {
                    name: spec.name.clone(),
                    start,
                    il: spec
                        .il
                        .iter()
                        .map(|(level, offsets)| {
                            let instructions = offsets
                                .iter()
                                .map(|(offset, operation)| IlInstruction {
                                    address: self.base + offset,
                                    operation: *operation,
                                })
                                .collect();
                            (*level, instructions)
                        })
                        .collect(),
                }));
            }
        }
        functions
    }
}

impl BinaryView for MockView {
    fn original_file_name(&self) -> String {
        self.file_name.clone()
    }

    fn parent_file_name(&self) -> Option<String> {
        self.parent.clone()
    }

    fn start(&self) -> u64 {
        self.base
    }

    fn length(&self) -> u64 {
        self.spec.size()
    }

    fn entry_point(&self) -> u64 {
        self.base + self.spec.entry_offset
    }

    fn default_architecture(&self) -> Option<Arc<dyn Architecture>> {
        Some(Arc::new(MockArch))
    }

    fn read(&self, address: u64, length: usize) -> Vec<u8> {
        if address < self.base {
            return Vec::new();
        }
        let offset = (address - self.base) as usize;
        if offset >= self.spec.content.len() {
            return Vec::new();
        }
        let end = self.spec.content.len().min(offset + length);
        self.spec.content[offset..end].to_vec()
    }

    fn write(&self, _address: u64, _data: &[u8]) -> usize {
        0
    }

    fn functions_containing(&self, address: u64) -> Vec<Arc<dyn Function>> {
        self.functions_at(address)
    }

    fn query_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.query(key)
    }

    fn store_metadata(&self, key: &str, value: Value) {
        self.metadata.store(key, value);
    }
}

/// Read-through overlay: memory comes from the live target, everything else
/// from the rebased static view.
struct MockLiveView {
    inner: Arc<dyn BinaryView>,
    reader: LiveMemoryReader,
    process: Arc<Mutex<MockProcess>>,
}

impl BinaryView for MockLiveView {
    fn original_file_name(&self) -> String {
        self.inner.original_file_name()
    }

    fn parent_file_name(&self) -> Option<String> {
        self.inner.parent_file_name()
    }

    fn start(&self) -> u64 {
        self.inner.start()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn entry_point(&self) -> u64 {
        self.inner.entry_point()
    }

    fn default_architecture(&self) -> Option<Arc<dyn Architecture>> {
        self.inner.default_architecture()
    }

    fn read(&self, address: u64, length: usize) -> Vec<u8> {
        (self.reader)(address, length)
    }

    fn write(&self, address: u64, data: &[u8]) -> usize {
        if self.process.lock().unwrap().write(address, data) {
            data.len()
        } else {
            0
        }
    }

    fn functions_containing(&self, address: u64) -> Vec<Arc<dyn Function>> {
        self.inner.functions_containing(address)
    }

    fn query_metadata(&self, key: &str) -> Option<Value> {
        self.inner.query_metadata(key)
    }

    fn store_metadata(&self, key: &str, value: Value) {
        self.inner.store_metadata(key, value);
    }
}

pub struct MockHost {
    settings: SettingsRegistry,
    spec: Arc<ProgramSpec>,
    adapter_type: Arc<MockAdapterType>,
}

impl MockHost {
    pub fn adapter_type(&self) -> &MockAdapterType {
        &self.adapter_type
    }

    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }
}

impl Host for MockHost {
    fn run_on_main_thread_and_wait(&self, task: Box<dyn FnOnce() + Send>) {
        // The mock host has no dedicated main thread.
        task();
    }

    fn rebase_view(
        &self,
        view: &Arc<dyn BinaryView>,
        new_base: u64,
    ) -> Option<Arc<dyn BinaryView>> {
        Some(Arc::new(MockView {
            spec: Arc::clone(&self.spec),
            base: new_base,
            file_name: view.original_file_name(),
            parent: view.parent_file_name(),
            metadata: Arc::new(MetadataStore::new()),
        }))
    }

    fn create_snapshot_view(
        &self,
        view: &Arc<dyn BinaryView>,
        reader: LiveMemoryReader,
    ) -> Option<Arc<dyn BinaryView>> {
        Some(Arc::new(MockLiveView {
            inner: Arc::clone(view),
            reader,
            process: self.adapter_type.process(),
        }))
    }

    fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }
}

// ---------------------------------------------------------------------------
// Test session assembly.

pub struct MockSession {
    pub host: Arc<dyn Host>,
    pub mock_host: Arc<MockHost>,
    pub view: Arc<dyn BinaryView>,
    pub spec: Arc<ProgramSpec>,
}

impl MockSession {
    /// Builds a host, view, and registered adapter type for `spec`. The
    /// adapter type is named after the program so concurrent tests do not
    /// collide in the process-wide registries.
    pub fn new(spec: ProgramSpec) -> MockSession {
        let spec = Arc::new(spec);
        let adapter_type_name = format!("MOCK {}", spec.file_name);
        let adapter_type =
            MockAdapterType::register(&adapter_type_name, Arc::clone(&spec), Vec::new());

        let mock_host = Arc::new(MockHost {
            settings: SettingsRegistry::new(),
            spec: Arc::clone(&spec),
            adapter_type,
        });
        let host: Arc<dyn Host> = mock_host.clone();

        let view: Arc<dyn BinaryView> = Arc::new(MockView {
            spec: Arc::clone(&spec),
            base: spec.static_base,
            file_name: spec.file_name.clone(),
            parent: None,
            metadata: Arc::new(MetadataStore::new()),
        });

        MockSession {
            host,
            mock_host,
            view,
            spec,
        }
    }

    /// A controller wired to this session's mock adapter type, with the
    /// executable path pointing at a file that exists.
    pub fn controller(&self) -> Arc<debugger::DebuggerController> {
        let controller = debugger::registry::get_or_create(&self.host, &self.view);
        controller
            .state()
            .set_adapter_type(&format!("MOCK {}", self.spec.file_name));
        let executable = std::env::current_exe()
            .expect("test executable path")
            .to_string_lossy()
            .into_owned();
        controller.state().set_executable_path(&executable);
        controller
    }

    pub fn process(&self) -> Arc<Mutex<MockProcess>> {
        self.mock_host.adapter_type().process()
    }

    /// A second view over the same program, e.g. a mapped child of the raw
    /// file view.
    pub fn view_named(&self, file_name: &str, parent: Option<&str>) -> Arc<dyn BinaryView> {
        Arc::new(MockView {
            spec: Arc::clone(&self.spec),
            base: self.spec.static_base,
            file_name: file_name.to_string(),
            parent: parent.map(str::to_string),
            metadata: Arc::new(MetadataStore::new()),
        })
    }
}
