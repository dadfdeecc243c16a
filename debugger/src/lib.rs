// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Native debugger engine.
//!
//! Drives a foreign process through pluggable back-end adapters and exposes
//! one uniform, synchronous debug API on top of them: session lifecycle,
//! stepping, memory/register inspection, and module-relative breakpoints
//! that survive restarts and rebases. The embedding platform is reached
//! exclusively through the traits in the `host-api` crate.

pub mod adapter;
pub mod adapter_type;
pub mod breakpoint;
pub mod controller;
pub mod error;
pub mod events;
pub mod queued;
pub mod registry;
pub mod state;

pub use self::{
    adapter::{
        same_base_module, AdapterCapability, DebugAdapter, DebugFrame, DebugModule, DebugRegister,
        DebugThread, LaunchConfig,
    },
    adapter_type::DebugAdapterType,
    breakpoint::{BreakpointRegistry, ModuleNameAndOffset},
    controller::{AddressInformation, DebuggerController},
    error::{ConnectionStatus, DebugStopReason, DebuggerError, TargetStatus},
    events::{DebuggerEvent, DebuggerEventCallback, EventBus, TargetStoppedData},
    queued::QueuedAdapter,
    state::DebuggerState,
};

pub use host_api::IlLevel;
