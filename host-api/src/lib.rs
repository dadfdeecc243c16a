// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Contract between the debugger engine and the embedding binary-analysis
//! platform.
//!
//! The engine never talks to a disassembler, an IL lifter, or a settings
//! store directly; it consumes the traits in this crate. The platform (or a
//! test harness) provides the implementations.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde_json::Value;

mod settings;

pub use settings::SettingsRegistry;

/// Function-graph level requested by stepping operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IlLevel {
    /// Native disassembly; no IL alignment.
    Normal,
    Low,
    Medium,
    High,
}

/// Classification of a lifted instruction, as coarse as the engine needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IlOperation {
    Call,
    Return,
    TailCall,
    Other,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IlInstruction {
    pub address: u64,
    pub operation: IlOperation,
}

/// Decoded facts about one native instruction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionInfo {
    pub length: usize,
}

/// One function's IL, at a fixed level.
pub trait IlFunction: Send + Sync {
    fn instruction_count(&self) -> usize;

    fn instruction(&self, index: usize) -> Option<IlInstruction>;

    /// Index of the IL instruction that starts exactly at `address`.
    fn instruction_start(&self, address: u64) -> Option<usize>;
}

/// An analysis function in the host's view.
pub trait Function: Send + Sync {
    fn start(&self) -> u64;

    fn name(&self) -> String;

    /// `None` when the requested level has not been generated for this
    /// function.
    fn il(&self, level: IlLevel) -> Option<Arc<dyn IlFunction>>;
}

/// The host's architecture plugin for the target.
pub trait Architecture: Send + Sync {
    fn name(&self) -> String;

    fn max_instruction_length(&self) -> usize;

    /// Decode the instruction at `address` from `data`.
    fn instruction_info(&self, data: &[u8], address: u64) -> Option<InstructionInfo>;

    /// Lift exactly one instruction and report its coarse operation.
    fn lift_instruction(&self, data: &[u8], address: u64) -> Option<IlInstruction>;
}

/// A loaded program image in the host, static or live.
///
/// `original_file_name` is the canonical identity used to key controllers;
/// two views over the same file (e.g. a raw view and its mapped child) share
/// it through `parent_file_name`.
pub trait BinaryView: Send + Sync {
    fn original_file_name(&self) -> String;

    fn parent_file_name(&self) -> Option<String> {
        None
    }

    /// Image base of this view.
    fn start(&self) -> u64;

    /// Total length of the image in bytes.
    fn length(&self) -> u64;

    fn entry_point(&self) -> u64;

    fn default_architecture(&self) -> Option<Arc<dyn Architecture>>;

    /// Reads up to `length` bytes; short reads return a short vector.
    fn read(&self, address: u64, length: usize) -> Vec<u8>;

    /// Returns the number of bytes written.
    fn write(&self, address: u64, data: &[u8]) -> usize;

    fn functions_containing(&self, address: u64) -> Vec<Arc<dyn Function>>;

    fn query_metadata(&self, key: &str) -> Option<Value>;

    fn store_metadata(&self, key: &str, value: Value);
}

/// Services memory reads of a snapshot view from the live target.
pub type LiveMemoryReader = Arc<dyn Fn(u64, usize) -> Vec<u8> + Send + Sync>;

/// The embedding platform.
pub trait Host: Send + Sync {
    /// Runs `task` on the host's main thread and blocks until it finishes.
    /// Must not be called from the main thread itself.
    fn run_on_main_thread_and_wait(&self, task: Box<dyn FnOnce() + Send>);

    /// Rebase `view` so that its image base equals `new_base`, returning the
    /// rebased view. Must be called on the main thread.
    fn rebase_view(
        &self,
        view: &Arc<dyn BinaryView>,
        new_base: u64,
    ) -> Option<Arc<dyn BinaryView>>;

    /// Create a read-through overlay of `view` whose memory reads are
    /// serviced by `reader` from the live target. Must be called on the main
    /// thread.
    fn create_snapshot_view(
        &self,
        view: &Arc<dyn BinaryView>,
        reader: LiveMemoryReader,
    ) -> Option<Arc<dyn BinaryView>>;

    fn settings(&self) -> &SettingsRegistry;
}

/// In-memory metadata store for views that do not persist anywhere.
#[derive(Default)]
pub struct MetadataStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn store(&self, key: &str, value: Value) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }
}
