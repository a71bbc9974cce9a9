use crate::types::{ScmAddress, ScmOpcode};

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Faults raised while decoding or executing script bytecode.
///
/// None of these are normal runtime conditions: they point at corrupt bytecode
/// or a missing opcode module, so the VM never retries.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Illegal Instruction {opcode:04x} encountered at offset {offset:04x} on thread {thread}")]
    IllegalInstruction {
        opcode: ScmOpcode,
        offset: ScmAddress,
        thread: String,
    },

    #[error("Unknown data type {ty:x} encountered at offset {offset:x} on thread {thread}")]
    UnknownType {
        ty: u8,
        offset: ScmAddress,
        thread: String,
    },

    #[error("call stack overflow (depth={depth}) on thread {thread}")]
    CallStackOverflow { depth: usize, thread: String },

    #[error("call stack underflow on thread {thread}")]
    CallStackUnderflow { thread: String },

    #[error("global out of bounds: offset={offset}, globals_size={size}")]
    GlobalOutOfBounds { offset: usize, size: usize },

    #[error("local out of bounds: index={index}, locals={size}")]
    LocalOutOfBounds { index: usize, size: usize },

    #[error("pc out of range: pc=0x{pc:X}, len=0x{len:X}")]
    PcOutOfRange { pc: ScmAddress, len: usize },

    #[error("missing argument {index} (instruction has {count})")]
    MissingArgument { index: usize, count: usize },

    #[error("argument {index} is not {expected}")]
    TypeMismatch { index: usize, expected: &'static str },

    #[error("mission {index} out of range ({count} missions)")]
    MissionOutOfRange { index: i32, count: usize },

    #[error("execute called from inside an opcode handler")]
    ReentrantExecute,
}

/// Structural problems found while splitting an SCM image into its sections.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScmFileError {
    #[error("truncated scm file: need {need} bytes at 0x{offset:X}, file is 0x{len:X} bytes")]
    Truncated { offset: usize, need: usize, len: usize },

    #[error("{section} section offset 0x{offset:X} is out of order")]
    BadSection { section: &'static str, offset: u32 },
}
