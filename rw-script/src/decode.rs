use crate::error::{ScriptError, ScriptResult};
use crate::file::ScmFile;
use crate::opcodes::{ScmOpcodes, ScriptFunctionMeta};
use crate::types::*;

/// One instruction pulled out of the bytecode, with its operands resolved to
/// values or variable references.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub address: ScmAddress,
    /// Opcode with the negation bit stripped.
    pub opcode: ScmOpcode,
    pub negated: bool,
    pub operands: Vec<Operand>,
    /// Address of the following instruction.
    pub next_pc: ScmAddress,
}

/// Read one operand at `*pc`, advancing past it.
pub fn decode_operand(file: &ScmFile, pc: &mut ScmAddress, thread: &str) -> ScriptResult<Operand> {
    let tag = file.read_u8(*pc)?;
    let ty = if tag > SCM_IMPLICIT_STRING_TAG {
        // the tag byte is the first character
        ScmType::String
    } else {
        *pc += 1;
        ScmType::from_tag(tag).ok_or_else(|| ScriptError::UnknownType {
            ty: tag,
            offset: *pc,
            thread: thread.to_string(),
        })?
    };

    let operand = match ty {
        ScmType::EndOfArgList => Operand::EndOfArgList,
        ScmType::Int8 => Operand::Int8(file.read_i8(*pc)?),
        ScmType::Int16 => Operand::Int16(file.read_i16(*pc)?),
        ScmType::Int32 => Operand::Int32(file.read_i32(*pc)?),
        ScmType::Global => Operand::Global(GlobalRef(file.read_u16(*pc)?)),
        ScmType::Local => Operand::Local(LocalRef(file.read_u16(*pc)?)),
        ScmType::Float16 => Operand::Float16(file.read_i16(*pc)? as f32 / 16.0),
        ScmType::String => Operand::String(ScmString(file.read_string(*pc)?)),
    };
    *pc += ty.payload_size() as ScmAddress;
    Ok(operand)
}

/// Decode the instruction at `address` against the registry.
///
/// Fixed-arity opcodes read exactly that many operands and keep any
/// end-of-list marker among them. Variadic opcodes read their minimum and then
/// continue until an end-of-list marker, which is consumed but not returned.
pub fn decode_instruction<C>(
    file: &ScmFile,
    opcodes: &ScmOpcodes<C>,
    address: ScmAddress,
    thread: &str,
) -> ScriptResult<(DecodedInstruction, ScriptFunctionMeta<C>)> {
    let raw = file.read_u16(address)?;
    let negated = raw & SCM_NEGATE_CONDITIONAL_MASK == SCM_NEGATE_CONDITIONAL_MASK;
    let opcode = raw & !SCM_NEGATE_CONDITIONAL_MASK;

    let meta = *opcodes
        .find_opcode(opcode)
        .ok_or_else(|| ScriptError::IllegalInstruction {
            opcode,
            offset: address,
            thread: thread.to_string(),
        })?;

    let mut pc = address + 2;
    let required = meta.arity.required();
    let variadic = meta.arity.is_variable();
    let mut operands = Vec::with_capacity(required);
    let mut read = 0usize;
    let mut more = variadic;

    while read < required || more {
        let operand = decode_operand(file, &mut pc, thread)?;
        read += 1;
        if operand == Operand::EndOfArgList && variadic {
            more = false;
            continue;
        }
        operands.push(operand);
    }

    Ok((
        DecodedInstruction {
            address,
            opcode,
            negated,
            operands,
            next_pc: pc,
        },
        meta,
    ))
}
