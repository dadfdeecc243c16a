// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide registry of adapter types.
//!
//! An adapter type is a factory plus the predicates the UI needs to offer a
//! sensible default: whether the type understands the program image at all,
//! and whether it can launch or connect on the current system.

use std::sync::{Arc, Mutex};

use host_api::{BinaryView, SettingsRegistry};
use lazy_static::lazy_static;
use serde_json::json;

use crate::adapter::DebugAdapter;

pub trait DebugAdapterType: Send + Sync {
    fn name(&self) -> &str;

    fn is_valid_for(&self, view: &dyn BinaryView) -> bool;

    fn can_execute(&self, view: &dyn BinaryView) -> bool;

    fn can_connect(&self, view: &dyn BinaryView) -> bool;

    fn create(&self, view: &Arc<dyn BinaryView>) -> Option<Arc<dyn DebugAdapter>>;

    /// Fresh launch-settings schema for this type.
    fn default_launch_settings(&self, view: &dyn BinaryView) -> SettingsRegistry {
        default_launch_settings(view)
    }

    fn launch_settings(&self, view: &dyn BinaryView) -> SettingsRegistry {
        self.default_launch_settings(view)
    }
}

fn default_launch_settings(_view: &dyn BinaryView) -> SettingsRegistry {
    let settings = SettingsRegistry::new();
    settings.register_group("target", "Target Options");
    settings.register_setting(
        "target.executable_path",
        json!({
            "title": "Executable Path",
            "type": "string",
            "default": "",
            "description": "Path of the executable to launch.",
            "readOnly": false,
        }),
    );
    settings.register_setting(
        "target.input_file",
        json!({
            "title": "Input File",
            "type": "string",
            "default": "",
            "description": "Input file used to find the base address of the binary view.",
            "readOnly": false,
        }),
    );
    settings.register_setting(
        "target.working_directory",
        json!({
            "title": "Working Directory",
            "type": "string",
            "default": "",
            "description": "Working directory to launch the target in.",
            "readOnly": false,
        }),
    );
    settings.register_setting(
        "target.command_line",
        json!({
            "title": "Command Line Arguments",
            "type": "string",
            "default": "",
            "description": "Command line arguments to pass to the target.",
            "readOnly": false,
        }),
    );
    settings
}

lazy_static! {
    static ref ADAPTER_TYPES: Mutex<Vec<Arc<dyn DebugAdapterType>>> = Mutex::new(Vec::new());
}

pub fn register(adapter_type: Arc<dyn DebugAdapterType>) {
    ADAPTER_TYPES.lock().unwrap().push(adapter_type);
}

pub fn get_by_name(name: &str) -> Option<Arc<dyn DebugAdapterType>> {
    ADAPTER_TYPES
        .lock()
        .unwrap()
        .iter()
        .find(|adapter_type| adapter_type.name() == name)
        .cloned()
}

/// Types that understand `view` and can either launch or connect here.
pub fn available_for(view: &dyn BinaryView) -> Vec<String> {
    ADAPTER_TYPES
        .lock()
        .unwrap()
        .iter()
        .filter(|adapter_type| {
            adapter_type.is_valid_for(view)
                && (adapter_type.can_connect(view) || adapter_type.can_execute(view))
        })
        .map(|adapter_type| adapter_type.name().to_string())
        .collect()
}

pub fn best_for_current_system(_view: &dyn BinaryView) -> &'static str {
    if cfg!(windows) {
        "DBGENG"
    } else {
        "LLDB"
    }
}

/// Drops every registered type; called at plugin unload.
pub fn clear() {
    ADAPTER_TYPES.lock().unwrap().clear();
}
