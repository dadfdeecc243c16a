// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stop-reason and error taxonomy.
//!
//! Nothing here crosses the API boundary as a Rust error: control operations
//! return booleans or a [`DebugStopReason`], and session-fatal problems are
//! additionally surfaced as `Error` events with the rendered text.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the target stopped.
///
/// Signal and Mach-exception values map one-to-one onto what back-ends
/// report; the meta values at the end never originate from a target.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DebugStopReason {
    #[default]
    Unknown,
    InitialBreakpoint,
    ProcessExited,
    AccessViolation,
    SingleStep,
    Calculation,
    Breakpoint,
    IllegalInstruction,
    SignalHup,
    SignalInt,
    SignalQuit,
    SignalIll,
    SignalAbrt,
    SignalEmt,
    SignalFpe,
    SignalKill,
    SignalBus,
    SignalSegv,
    SignalSys,
    SignalPipe,
    SignalAlrm,
    SignalTerm,
    SignalUrg,
    SignalStop,
    SignalTstp,
    SignalCont,
    SignalChld,
    SignalTtin,
    SignalTtou,
    SignalIo,
    SignalXcpu,
    SignalXfsz,
    SignalVtalrm,
    SignalProf,
    SignalWinch,
    SignalInfo,
    SignalUsr1,
    SignalUsr2,
    SignalStkflt,
    SignalBux,
    SignalPoll,
    ExcEmulation,
    ExcSoftware,
    ExcSyscall,
    ExcMachSyscall,
    ExcRpcAlert,
    ExcCrash,
    InternalError,
    InvalidStatusOrOperation,
    UserRequestedBreak,
}

impl DebugStopReason {
    /// True for stops a stepping loop may treat as "the step landed".
    /// Some back-ends report `Breakpoint` for a completed single step.
    pub fn is_expected_single_step(self) -> bool {
        matches!(self, DebugStopReason::SingleStep | DebugStopReason::Breakpoint)
    }
}

impl Display for DebugStopReason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            DebugStopReason::Unknown => "Unknown",
            DebugStopReason::InitialBreakpoint => "Initial Breakpoint",
            DebugStopReason::ProcessExited => "Process Exited",
            DebugStopReason::AccessViolation => "Access Violation",
            DebugStopReason::SingleStep => "Single Step",
            DebugStopReason::Calculation => "Calculation",
            DebugStopReason::Breakpoint => "Breakpoint",
            DebugStopReason::IllegalInstruction => "Illegal Instruction",
            DebugStopReason::SignalHup => "Signal HUP",
            DebugStopReason::SignalInt => "Signal INT",
            DebugStopReason::SignalQuit => "Signal QUIT",
            DebugStopReason::SignalIll => "Signal ILL",
            DebugStopReason::SignalAbrt => "Signal ABRT",
            DebugStopReason::SignalEmt => "Signal EMT",
            DebugStopReason::SignalFpe => "Signal FPE",
            DebugStopReason::SignalKill => "Signal KILL",
            DebugStopReason::SignalBus => "Signal BUS",
            DebugStopReason::SignalSegv => "Signal SEGV",
            DebugStopReason::SignalSys => "Signal SYS",
            DebugStopReason::SignalPipe => "Signal PIPE",
            DebugStopReason::SignalAlrm => "Signal ALRM",
            DebugStopReason::SignalTerm => "Signal TERM",
            DebugStopReason::SignalUrg => "Signal URG",
            DebugStopReason::SignalStop => "Signal STOP",
            DebugStopReason::SignalTstp => "Signal TSTP",
            DebugStopReason::SignalCont => "Signal CONT",
            DebugStopReason::SignalChld => "Signal CHLD",
            DebugStopReason::SignalTtin => "Signal TTIN",
            DebugStopReason::SignalTtou => "Signal TTOU",
            DebugStopReason::SignalIo => "Signal IO",
            DebugStopReason::SignalXcpu => "Signal XCPU",
            DebugStopReason::SignalXfsz => "Signal XFSZ",
            DebugStopReason::SignalVtalrm => "Signal VTALRM",
            DebugStopReason::SignalProf => "Signal PROF",
            DebugStopReason::SignalWinch => "Signal WINCH",
            DebugStopReason::SignalInfo => "Signal INFO",
            DebugStopReason::SignalUsr1 => "Signal USR1",
            DebugStopReason::SignalUsr2 => "Signal USR2",
            DebugStopReason::SignalStkflt => "Signal STKFLT",
            DebugStopReason::SignalBux => "Signal BUX",
            DebugStopReason::SignalPoll => "Signal POLL",
            DebugStopReason::ExcEmulation => "Exception Emulation",
            DebugStopReason::ExcSoftware => "Exception Software",
            DebugStopReason::ExcSyscall => "Exception Syscall",
            DebugStopReason::ExcMachSyscall => "Exception Mach Syscall",
            DebugStopReason::ExcRpcAlert => "Exception RPC Alert",
            DebugStopReason::ExcCrash => "Exception Crash",
            DebugStopReason::InternalError => "Internal Error",
            DebugStopReason::InvalidStatusOrOperation => "Invalid Status Or Operation",
            DebugStopReason::UserRequestedBreak => "User Requested Break",
        };
        formatter.write_str(text)
    }
}

/// Whether an adapter session is established.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connecting,
    Connected,
}

impl Display for ConnectionStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::NotConnected => "Not Connected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
        };
        formatter.write_str(text)
    }
}

/// Execution state of the target, as seen by API callers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    /// No target, or the state is being refreshed.
    #[default]
    Invalid,
    Running,
    Paused,
}

impl Display for TargetStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            TargetStatus::Invalid => "Invalid",
            TargetStatus::Running => "Running",
            TargetStatus::Paused => "Paused",
        };
        formatter.write_str(text)
    }
}

/// Session-level failures. Each variant renders a long message via `Display`
/// and a short tag for compact surfaces.
#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("the back-end could not create or attach to the target: {0}")]
    LaunchFailed(String),

    #[error("operation is not valid in the current debugger state")]
    InvalidStatus,

    #[error("internal debugger error: {0}")]
    Internal(String),

    #[error("target memory access failed at 0x{address:x}")]
    Io { address: u64 },
}

impl DebuggerError {
    pub fn short_tag(&self) -> &'static str {
        match self {
            DebuggerError::LaunchFailed(_) => "launch failed",
            DebuggerError::InvalidStatus => "invalid status",
            DebuggerError::Internal(_) => "internal error",
            DebuggerError::Io { .. } => "io error",
        }
    }
}
