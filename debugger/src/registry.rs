// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide controller bookkeeping.
//!
//! Exactly one controller exists per canonical program-image identity (the
//! image's original file name). Lookups also match a view against the
//! controller created for its parent image, so a mapped child view reaches
//! the controller of the file it came from.

use std::sync::{Arc, Mutex};

use host_api::{BinaryView, Host, SettingsRegistry};
use lazy_static::lazy_static;
use serde_json::json;

use crate::{adapter_type, controller::DebuggerController};

lazy_static! {
    static ref CONTROLLERS: Mutex<Vec<Arc<DebuggerController>>> = Mutex::new(Vec::new());
}

fn matches(controller: &DebuggerController, view: &dyn BinaryView) -> bool {
    let existing = controller.view().original_file_name();
    if existing == view.original_file_name() {
        return true;
    }
    match view.parent_file_name() {
        Some(parent) => existing == parent,
        None => false,
    }
}

/// The controller for `view`, created on first request.
pub fn get_or_create(host: &Arc<dyn Host>, view: &Arc<dyn BinaryView>) -> Arc<DebuggerController> {
    register_default_settings(host.settings());

    let mut controllers = CONTROLLERS.lock().unwrap();
    for controller in controllers.iter() {
        if matches(controller, view.as_ref()) {
            return Arc::clone(controller);
        }
    }

    let controller = DebuggerController::new(Arc::clone(host), Arc::clone(view));
    controllers.push(Arc::clone(&controller));
    controller
}

pub fn exists(view: &dyn BinaryView) -> bool {
    CONTROLLERS
        .lock()
        .unwrap()
        .iter()
        .any(|controller| matches(controller, view))
}

/// Drops the controller for `view`. Live sessions should be quit first;
/// outstanding references keep the controller alive until they drop.
pub fn destroy(view: &dyn BinaryView) {
    CONTROLLERS
        .lock()
        .unwrap()
        .retain(|controller| controller.view().original_file_name() != view.original_file_name());
}

/// Tears down every process-wide table; called at plugin unload.
pub fn shutdown() {
    CONTROLLERS.lock().unwrap().clear();
    adapter_type::clear();
}

/// Engine settings, registered under the `debugger` group on first use.
pub fn register_default_settings(settings: &SettingsRegistry) {
    settings.register_group("debugger", "Debugger");
    settings.register_setting(
        "debugger.stopAtSystemEntryPoint",
        json!({
            "title": "Stop At System Entry Point",
            "type": "boolean",
            "default": false,
            "description": "Stop the target at the system entry point (the loader), before any user code runs.",
        }),
    );
    settings.register_setting(
        "debugger.stopAtEntryPoint",
        json!({
            "title": "Stop At Entry Point",
            "type": "boolean",
            "default": true,
            "description": "Add a breakpoint at the program entry point when a debugger is created for it.",
        }),
    );
    settings.register_setting(
        "debugger.stackVariableAnnotations",
        json!({
            "title": "Stack Variable Annotations",
            "type": "boolean",
            "default": true,
            "description": "Annotate stack variables in the live view while the target is paused.",
        }),
    );
    settings.register_setting(
        "debugger.aggressiveAnalysisUpdate",
        json!({
            "title": "Aggressive Analysis Update",
            "type": "boolean",
            "default": false,
            "description": "Re-analyze the live view after every stop instead of on demand.",
        }),
    );
    settings.register_setting(
        "debugger.safeMode",
        json!({
            "title": "Safe Mode",
            "type": "boolean",
            "default": false,
            "description": "Refuse operations that execute target code.",
        }),
    );
    settings.register_setting(
        "debugger.confirmFirstLaunch",
        json!({
            "title": "Confirm First Launch",
            "type": "boolean",
            "default": true,
            "description": "Ask for confirmation before the first launch of a target.",
        }),
    );
    settings.register_setting(
        "debugger.holdAnalysis",
        json!({
            "title": "Hold Analysis",
            "type": "boolean",
            "default": false,
            "description": "Suspend analysis updates while the target is running.",
        }),
    );
}
