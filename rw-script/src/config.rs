use std::env;

use serde::{Deserialize, Serialize};

/// What `execute` does when a thread faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaultPolicy {
    /// Stop the pass and hand the error to the caller.
    #[default]
    Abort,
    /// Log the error, end the faulting thread and keep going.
    TerminateThread,
}

/// Runtime switches for a [`ScriptMachine`](crate::ScriptMachine).
///
/// Environment:
/// - RW_SCRIPT_TRACE=1 logs every dispatched instruction at trace level
/// - RW_SCRIPT_DEBUG_THREAD=<name> limits tracing to one thread
/// - RW_SCRIPT_FAULT=abort|thread selects the [`FaultPolicy`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub fault_policy: FaultPolicy,
    pub trace: bool,
    pub trace_thread: Option<String>,
}

fn parse_bool_env(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            !(s.is_empty() || s == "0" || s == "false" || s == "no" || s == "off")
        }
        Err(_) => false,
    }
}

fn parse_fault_policy(s: &str) -> Option<FaultPolicy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "abort" | "stop" => Some(FaultPolicy::Abort),
        "thread" | "terminate" | "kill" => Some(FaultPolicy::TerminateThread),
        _ => None,
    }
}

impl MachineConfig {
    pub fn from_env() -> Self {
        let trace_thread = env::var("RW_SCRIPT_DEBUG_THREAD")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let fault_policy = match env::var("RW_SCRIPT_FAULT") {
            Ok(v) => parse_fault_policy(&v).unwrap_or_else(|| {
                log::warn!("RW_SCRIPT_FAULT={v:?} not understood, using abort");
                FaultPolicy::Abort
            }),
            Err(_) => FaultPolicy::Abort,
        };
        Self {
            fault_policy,
            // naming a thread implies tracing it
            trace: parse_bool_env("RW_SCRIPT_TRACE") || trace_thread.is_some(),
            trace_thread,
        }
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Trace every thread, or only `thread` when given.
    pub fn with_trace(mut self, thread: Option<&str>) -> Self {
        self.trace = true;
        self.trace_thread = thread.map(str::to_string);
        self
    }

    pub fn traces(&self, thread: &str) -> bool {
        self.trace && self.trace_thread.as_deref().map_or(true, |t| t == thread)
    }
}
