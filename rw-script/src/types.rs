use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type ScmOpcode = u16;
pub type ScmAddress = u32;

/// High bit of an opcode word: invert the conditional result after dispatch.
pub const SCM_NEGATE_CONDITIONAL_MASK: ScmOpcode = 0x8000;
pub const SCM_CONDITIONAL_MASK_PASSED: u8 = 0xFF;

/// Number of variables in each thread's local bank.
pub const SCM_THREAD_LOCAL_SIZE: usize = 256;

/// Width of one script variable in bytes. Changing this breaks saves.
pub const SCM_VARIABLE_SIZE: usize = 4;

/// Maximum gosub nesting per thread.
pub const SCM_STACK_DEPTH: usize = 4;

/// Local variables that count up by the elapsed milliseconds every pass.
pub const SCM_TIMER_LOCALS: [usize; 2] = [16, 17];

/// Tag bytes above this value are the first character of an inline string.
pub const SCM_IMPLICIT_STRING_TAG: u8 = 42;

pub const SCM_STRING_SIZE: usize = 8;

/// Operand type tags as they appear in the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScmType {
    EndOfArgList = 0x00,
    Int32 = 0x01,
    Global = 0x02,
    Local = 0x03,
    Int8 = 0x04,
    Int16 = 0x05,
    Float16 = 0x06,
    String = 0x09,
}

impl ScmType {
    /// Map an explicit tag byte. Implicit strings are handled by the decoder.
    pub fn from_tag(tag: u8) -> Option<ScmType> {
        match tag {
            0x00 => Some(ScmType::EndOfArgList),
            0x01 => Some(ScmType::Int32),
            0x02 => Some(ScmType::Global),
            0x03 => Some(ScmType::Local),
            0x04 => Some(ScmType::Int8),
            0x05 => Some(ScmType::Int16),
            0x06 => Some(ScmType::Float16),
            0x09 => Some(ScmType::String),
            _ => None,
        }
    }

    /// Payload bytes following the tag.
    pub fn payload_size(self) -> usize {
        match self {
            ScmType::EndOfArgList => 0,
            ScmType::Int8 => 1,
            ScmType::Int16 | ScmType::Global | ScmType::Local | ScmType::Float16 => 2,
            ScmType::Int32 => 4,
            ScmType::String => SCM_STRING_SIZE,
        }
    }
}

/// A reference into machine-wide global memory, by byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalRef(pub u16);

impl GlobalRef {
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

/// A reference into the executing thread's local bank, by variable index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalRef(pub u16);

impl LocalRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn offset(self) -> usize {
        self.index() * SCM_VARIABLE_SIZE
    }
}

/// Fixed-width inline string, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScmString(pub [u8; SCM_STRING_SIZE]);

impl ScmString {
    pub fn new(s: &str) -> Self {
        let mut buf = [0u8; SCM_STRING_SIZE];
        for (dst, src) in buf.iter_mut().zip(s.bytes()) {
            *dst = src;
        }
        ScmString(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(SCM_STRING_SIZE);
        &self.0[..end]
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl fmt::Debug for ScmString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// One decoded instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    EndOfArgList,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    /// Fixed point value stored as `i16 / 16`.
    Float16(f32),
    Global(GlobalRef),
    Local(LocalRef),
    String(ScmString),
}

impl Operand {
    pub fn ty(&self) -> ScmType {
        match self {
            Operand::EndOfArgList => ScmType::EndOfArgList,
            Operand::Int8(_) => ScmType::Int8,
            Operand::Int16(_) => ScmType::Int16,
            Operand::Int32(_) => ScmType::Int32,
            Operand::Float16(_) => ScmType::Float16,
            Operand::Global(_) => ScmType::Global,
            Operand::Local(_) => ScmType::Local,
            Operand::String(_) => ScmType::String,
        }
    }

    pub fn immediate_int(&self) -> Option<i32> {
        match self {
            Operand::Int8(v) => Some(*v as i32),
            Operand::Int16(v) => Some(*v as i32),
            Operand::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn immediate_real(&self) -> Option<f32> {
        match self {
            Operand::Float16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_lvalue(&self) -> bool {
        matches!(self, Operand::Global(_) | Operand::Local(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::EndOfArgList => write!(f, "<end>"),
            Operand::Int8(v) => write!(f, "{v}"),
            Operand::Int16(v) => write!(f, "{v}"),
            Operand::Int32(v) => write!(f, "{v}"),
            Operand::Float16(v) => write!(f, "{v:.4}"),
            Operand::Global(g) => write!(f, "global[0x{:04X}]", g.0),
            Operand::Local(l) => write!(f, "local[{}]", l.0),
            Operand::String(s) => write!(f, "'{}'", s.to_string_lossy()),
        }
    }
}
