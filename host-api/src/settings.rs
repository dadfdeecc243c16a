// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{collections::BTreeMap, sync::Mutex};

use serde_json::Value;

/// Schema-backed settings store.
///
/// Settings are registered as JSON property objects
/// (`title`/`type`/`default`/`description`) grouped by a dotted prefix, the
/// shape the platform's settings UI consumes. Queries fall back to the
/// registered default until a value is explicitly set.
#[derive(Default)]
pub struct SettingsRegistry {
    groups: Mutex<BTreeMap<String, String>>,
    schema: Mutex<BTreeMap<String, Value>>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_group(&self, name: &str, title: &str) {
        self.groups
            .lock()
            .unwrap()
            .insert(name.to_string(), title.to_string());
    }

    pub fn register_setting(&self, key: &str, properties: Value) {
        self.schema
            .lock()
            .unwrap()
            .insert(key.to_string(), properties);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.schema.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.schema.lock().unwrap().keys().cloned().collect()
    }

    pub fn properties(&self, key: &str) -> Option<Value> {
        self.schema.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.values.lock().unwrap().get(key) {
            return Some(value.clone());
        }
        self.schema
            .lock()
            .unwrap()
            .get(key)
            .and_then(|properties| properties.get("default").cloned())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}
