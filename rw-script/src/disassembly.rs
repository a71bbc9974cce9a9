use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::decode::decode_instruction;
use crate::error::ScriptResult;
use crate::file::ScmFile;
use crate::opcodes::ScmOpcodes;
use crate::types::{Operand, ScmAddress, ScmOpcode};

/// Thread name reported in decode errors raised while disassembling.
pub const DISASSEMBLER_THREAD: &str = "Disassembler";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct InstructionFlags: u8 {
        const NEGATED_CONDITIONAL = 1 << 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionInfo {
    pub opcode: ScmOpcode,
    pub operands: Vec<Operand>,
    pub flags: InstructionFlags,
}

/// Linear decode of a code range into an address-ordered listing.
pub struct ScriptDisassembly<'a, C> {
    opcodes: &'a ScmOpcodes<C>,
    file: &'a ScmFile,
    instructions: BTreeMap<ScmAddress, InstructionInfo>,
}

impl<'a, C> ScriptDisassembly<'a, C> {
    pub fn new(opcodes: &'a ScmOpcodes<C>, file: &'a ScmFile) -> Self {
        Self {
            opcodes,
            file,
            instructions: BTreeMap::new(),
        }
    }

    /// Decode from `start` up to the end of the main section.
    pub fn disassemble(&mut self, start: ScmAddress) -> ScriptResult<()> {
        let end = self.file.main_size();
        let mut address = start;
        while address < end {
            let (decoded, _) = decode_instruction(self.file, self.opcodes, address, DISASSEMBLER_THREAD)?;
            let mut flags = InstructionFlags::empty();
            if decoded.negated {
                flags |= InstructionFlags::NEGATED_CONDITIONAL;
            }
            self.instructions.insert(
                address,
                InstructionInfo {
                    opcode: decoded.opcode,
                    operands: decoded.operands,
                    flags,
                },
            );
            address = decoded.next_pc;
        }
        log::debug!(
            "disassembled {} instructions in 0x{start:06X}..0x{end:06X}",
            self.instructions.len()
        );
        Ok(())
    }

    pub fn instructions(&self) -> &BTreeMap<ScmAddress, InstructionInfo> {
        &self.instructions
    }

    pub fn into_instructions(self) -> BTreeMap<ScmAddress, InstructionInfo> {
        self.instructions
    }
}
