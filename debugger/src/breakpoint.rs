// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The authoritative set of user breakpoints.
//!
//! Breakpoints are stored module-relative so they survive restarts and
//! rebases; the absolute form exists only while the owning module is loaded,
//! and is what actually gets poked into the adapter. `apply_all` reconciles
//! the installed set against the relative set after every stop.

use std::collections::BTreeSet;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::{adapter::DebugAdapter, state::DebuggerModules};

/// The persistent identity of a breakpoint: a module name plus an offset
/// from that module's base. An empty module name marks an address that no
/// loaded module contained when the breakpoint was set.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleNameAndOffset {
    pub module: String,
    pub offset: u64,
}

impl ModuleNameAndOffset {
    pub fn new(module: impl Into<String>, offset: u64) -> Self {
        ModuleNameAndOffset {
            module: module.into(),
            offset,
        }
    }
}

#[derive(Default)]
pub struct BreakpointRegistry {
    relative: BTreeSet<ModuleNameAndOffset>,
    /// Absolute addresses currently installed in the adapter.
    installed: BTreeSet<u64>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the breakpoint was already present.
    pub fn add_relative(&mut self, breakpoint: ModuleNameAndOffset) -> bool {
        self.relative.insert(breakpoint)
    }

    pub fn remove_relative(&mut self, breakpoint: &ModuleNameAndOffset) -> bool {
        self.relative.remove(breakpoint)
    }

    pub fn contains_relative(&self, breakpoint: &ModuleNameAndOffset) -> bool {
        self.relative.contains(breakpoint)
    }

    /// Stores an absolute address in its relative form. The address is
    /// attributed to the module whose range contains it; with no such
    /// module the raw address is kept under an empty module name.
    pub fn relative_for_absolute(
        modules: &DebuggerModules,
        address: u64,
    ) -> ModuleNameAndOffset {
        match modules.absolute_to_relative(address) {
            Some(relative) => relative,
            None => ModuleNameAndOffset::new("", address),
        }
    }

    /// True when any stored breakpoint resolves to `address` under the
    /// current module list. Resolution-based so that every name form of a
    /// module ("prog", "/opt/prog") reaches the same breakpoint.
    pub fn contains_absolute(&self, modules: &DebuggerModules, address: u64) -> bool {
        self.find_relative_for(modules, address).is_some()
    }

    /// The stored breakpoint that resolves to `address`, if any.
    pub fn find_relative_for(
        &self,
        modules: &DebuggerModules,
        address: u64,
    ) -> Option<ModuleNameAndOffset> {
        self.relative
            .iter()
            .find(|breakpoint| modules.relative_to_absolute(breakpoint) == Some(address))
            .cloned()
    }

    pub fn relatives(&self) -> Vec<ModuleNameAndOffset> {
        self.relative.iter().cloned().collect()
    }

    pub fn installed(&self) -> Vec<u64> {
        self.installed.iter().copied().collect()
    }

    pub fn is_installed(&self, address: u64) -> bool {
        self.installed.contains(&address)
    }

    pub fn note_installed(&mut self, address: u64) {
        self.installed.insert(address);
    }

    pub fn note_removed(&mut self, address: u64) {
        self.installed.remove(&address);
    }

    /// Dropped on disconnect; the relative set is what persists.
    pub fn clear_installed(&mut self) {
        self.installed.clear();
    }

    /// Makes the adapter's installed set match the resolvable relative set.
    /// Idempotent; called after the module cache refreshes at a stop.
    pub fn apply_all(&mut self, modules: &DebuggerModules, adapter: &dyn DebugAdapter) {
        let mut wanted = BTreeSet::new();
        for breakpoint in &self.relative {
            if let Some(address) = modules.relative_to_absolute(breakpoint) {
                wanted.insert(address);
            }
        }

        for address in wanted.difference(&self.installed) {
            trace!("installing breakpoint at 0x{:x}", address);
            adapter.add_breakpoint(*address);
        }
        for address in self.installed.difference(&wanted) {
            trace!("removing stale breakpoint at 0x{:x}", address);
            adapter.remove_breakpoint(*address);
        }

        self.installed = wanted;
    }
}
