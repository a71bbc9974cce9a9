use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::types::*;

#[derive(Debug, Clone, Copy)]
enum LabelKind {
    Absolute,
    /// Negative offset from a thread base.
    Relative(ScmAddress),
}

#[derive(Debug, Clone)]
struct Fixup {
    /// Position of the int32 payload inside `code`.
    at: usize,
    label: String,
    kind: LabelKind,
}

/// Emits SCM bytecode for a code block that will be placed at `origin`.
///
/// Labels may be referenced before they are defined; references are patched
/// by [`finish`](ScriptWriter::finish).
#[derive(Debug, Clone)]
pub struct ScriptWriter {
    origin: ScmAddress,
    code: Vec<u8>,
    labels: HashMap<String, ScmAddress>,
    fixups: Vec<Fixup>,
}

impl ScriptWriter {
    pub fn new(origin: ScmAddress) -> Self {
        Self {
            origin,
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn origin(&self) -> ScmAddress {
        self.origin
    }

    /// Address of the next byte to be written.
    pub fn address(&self) -> ScmAddress {
        self.origin + self.code.len() as ScmAddress
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let at = self.address();
        self.labels.insert(name.to_string(), at);
        self
    }

    pub fn label_address(&self, name: &str) -> Option<ScmAddress> {
        self.labels.get(name).copied()
    }

    fn put_u8(&mut self, v: u8) {
        self.code.push(v);
    }

    fn put_u16_le(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32_le(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    pub fn opcode(&mut self, op: ScmOpcode) -> &mut Self {
        self.put_u16_le(op);
        self
    }

    /// Opcode with its conditional result inverted.
    pub fn negated(&mut self, op: ScmOpcode) -> &mut Self {
        self.put_u16_le(op | SCM_NEGATE_CONDITIONAL_MASK);
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.put_u8(ScmType::EndOfArgList as u8);
        self
    }

    pub fn int8(&mut self, v: i8) -> &mut Self {
        self.put_u8(ScmType::Int8 as u8);
        self.put_u8(v as u8);
        self
    }

    pub fn int16(&mut self, v: i16) -> &mut Self {
        self.put_u8(ScmType::Int16 as u8);
        self.put_u16_le(v as u16);
        self
    }

    pub fn int32(&mut self, v: i32) -> &mut Self {
        self.put_u8(ScmType::Int32 as u8);
        self.put_u32_le(v as u32);
        self
    }

    /// Smallest integer encoding that holds `v`.
    pub fn int(&mut self, v: i32) -> &mut Self {
        if let Ok(v) = i8::try_from(v) {
            self.int8(v)
        } else if let Ok(v) = i16::try_from(v) {
            self.int16(v)
        } else {
            self.int32(v)
        }
    }

    /// Fixed point, sixteenths.
    pub fn float16(&mut self, v: f32) -> &mut Self {
        self.put_u8(ScmType::Float16 as u8);
        self.put_u16_le((v * 16.0).round() as i16 as u16);
        self
    }

    pub fn global(&mut self, offset: u16) -> &mut Self {
        self.put_u8(ScmType::Global as u8);
        self.put_u16_le(offset);
        self
    }

    pub fn local(&mut self, index: u16) -> &mut Self {
        self.put_u8(ScmType::Local as u8);
        self.put_u16_le(index);
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.put_u8(ScmType::String as u8);
        self.code.extend_from_slice(&ScmString::new(s).0);
        self
    }

    /// Tagless string; the first byte doubles as the tag so it must be
    /// printable above `*`.
    pub fn implicit_string(&mut self, s: &str) -> Result<&mut Self> {
        let raw = ScmString::new(s);
        if raw.0[0] <= SCM_IMPLICIT_STRING_TAG {
            bail!("implicit string {s:?} must start with a byte above 0x{SCM_IMPLICIT_STRING_TAG:02X}");
        }
        self.code.extend_from_slice(&raw.0);
        Ok(self)
    }

    pub fn operand(&mut self, op: &Operand) -> &mut Self {
        match *op {
            Operand::EndOfArgList => self.end(),
            Operand::Int8(v) => self.int8(v),
            Operand::Int16(v) => self.int16(v),
            Operand::Int32(v) => self.int32(v),
            Operand::Float16(v) => self.float16(v),
            Operand::Global(g) => self.global(g.0),
            Operand::Local(l) => self.local(l.0),
            Operand::String(s) => {
                self.put_u8(ScmType::String as u8);
                self.code.extend_from_slice(&s.0);
                self
            }
        }
    }

    fn label_ref(&mut self, name: &str, kind: LabelKind) -> &mut Self {
        self.put_u8(ScmType::Int32 as u8);
        self.fixups.push(Fixup {
            at: self.code.len(),
            label: name.to_string(),
            kind,
        });
        self.put_u32_le(0);
        self
    }

    /// Int32 operand holding the absolute address of `name`.
    pub fn label_abs(&mut self, name: &str) -> &mut Self {
        self.label_ref(name, LabelKind::Absolute)
    }

    /// Int32 operand holding `-(address - base)`, resolved against the
    /// thread base at run time.
    pub fn label_rel(&mut self, name: &str, base: ScmAddress) -> &mut Self {
        self.label_ref(name, LabelKind::Relative(base))
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        for fixup in std::mem::take(&mut self.fixups) {
            let Some(&target) = self.labels.get(&fixup.label) else {
                bail!("undefined label {}", fixup.label);
            };
            let value = match fixup.kind {
                LabelKind::Absolute => target as i32,
                LabelKind::Relative(base) => {
                    if target <= base {
                        bail!(
                            "label {} at 0x{target:X} is not after thread base 0x{base:X}",
                            fixup.label
                        );
                    }
                    -((target - base) as i32)
                }
            };
            self.code[fixup.at..fixup.at + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(self.code)
    }
}
