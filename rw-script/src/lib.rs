//! rw-script
//!
//! The SCM mission script virtual machine used by the OpenRW engine.
//!
//! A [`ScriptMachine`] owns a loaded [`ScmFile`], an opcode registry built from
//! [`ScriptModule`]s and an opaque host context. The game loop calls
//! [`ScriptMachine::execute`] once per frame; every live [`ScmThread`] then runs
//! until it waits, yields or ends.

pub mod assembler;
pub mod config;
pub mod decode;
pub mod disassembly;
pub mod error;
pub mod file;
pub mod machine;
pub mod modules;
pub mod opcodes;
pub mod snapshot;
pub mod thread;
pub mod types;

pub use assembler::ScriptWriter;
pub use config::{FaultPolicy, MachineConfig};
pub use decode::{decode_instruction, DecodedInstruction};
pub use disassembly::{InstructionFlags, InstructionInfo, ScriptDisassembly};
pub use error::{ScmFileError, ScriptError, ScriptResult};
pub use file::{ScmFile, ScmFileBuilder, ScmLayout, ScmTarget};
pub use machine::{Breakpoint, BreakpointInfo, ScriptArguments, ScriptMachine};
pub use modules::{game::ScriptHost, game_module, vm_module};
pub use opcodes::{Arity, OpcodeFlags, ScmOpcodes, ScriptFunction, ScriptFunctionMeta, ScriptModule};
pub use snapshot::ScriptSnapshot;
pub use thread::ScmThread;
pub use types::*;
