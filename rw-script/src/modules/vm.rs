//! Control flow, variable arithmetic and thread management opcodes.

use crate::error::{ScriptError, ScriptResult};
use crate::machine::ScriptArguments;
use crate::opcodes::{OpcodeFlags, ScriptFunctionMeta, ScriptModule};

type Args<'a, C> = ScriptArguments<'a, C>;

/// 0x0001 wait
fn vm_sleep<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let ms = args.int(0)?;
    args.thread_mut().sleep(ms);
    Ok(())
}

/// 0x0002 goto
fn vm_jump<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let label = args.int(0)?;
    args.thread_mut().jump(label);
    Ok(())
}

fn vm_set_int<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.int(1)?;
    args.set_int(0, v)
}

fn vm_set_float<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.real(1)?;
    args.set_real(0, v)
}

fn vm_inc_int<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.int(0)?.wrapping_add(args.int(1)?);
    args.set_int(0, v)
}

fn vm_inc_float<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.real(0)? + args.real(1)?;
    args.set_real(0, v)
}

fn vm_dec_int<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.int(0)?.wrapping_sub(args.int(1)?);
    args.set_int(0, v)
}

fn vm_dec_float<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.real(0)? - args.real(1)?;
    args.set_real(0, v)
}

fn vm_div_float<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.real(0)? / args.real(1)?;
    args.set_real(0, v)
}

fn vm_int_gt<C>(args: &mut Args<'_, C>) -> ScriptResult<bool> {
    Ok(args.int(0)? > args.int(1)?)
}

fn vm_float_gt<C>(args: &mut Args<'_, C>) -> ScriptResult<bool> {
    Ok(args.real(0)? > args.real(1)?)
}

fn vm_int_ge<C>(args: &mut Args<'_, C>) -> ScriptResult<bool> {
    Ok(args.int(0)? >= args.int(1)?)
}

fn vm_int_eq<C>(args: &mut Args<'_, C>) -> ScriptResult<bool> {
    Ok(args.int(0)? == args.int(1)?)
}

/// 0x004F start_new_script
///
/// Operands after the label seed the new thread's locals in order.
fn vm_new_thread<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let start = args.thread().localize_label(args.int(0)?);
    let mut seeds = Vec::with_capacity(args.len().saturating_sub(1));
    for i in 1..args.len() {
        seeds.push(args.word(i)?);
    }

    let thread = args.vm_mut().start_thread(start, false);
    for (index, word) in seeds.into_iter().enumerate() {
        thread.write_local_word(index, word)?;
    }
    Ok(())
}

/// 0x004D else_jump
fn vm_jump_if_false<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    if !args.thread().condition_result() {
        let label = args.int(0)?;
        args.thread_mut().jump(label);
    }
    Ok(())
}

/// 0x004E terminate_this_script
fn vm_halt_thread<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    args.thread_mut().terminate();
    Ok(())
}

/// 0x0050 gosub
fn vm_call<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let label = args.int(0)?;
    let thread = args.thread_mut();
    let ret = thread.pc();
    thread.push_call(ret)?;
    thread.jump(label);
    Ok(())
}

/// 0x0051 return
fn vm_return<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let thread = args.thread_mut();
    let ret = thread.pop_call()?;
    thread.set_pc(ret);
    Ok(())
}

/// 0x00D6 andor
fn vm_if<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let n = args.int(0)?;
    args.thread_mut().begin_condition(n);
    Ok(())
}

fn vm_new_mission_thread<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let start = args.thread().localize_label(args.int(0)?);
    args.vm_mut().start_thread(start, true);
    Ok(())
}

/// 0x03A4 script_name
fn vm_name_thread<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let name = args.string(0)?;
    log::info!("thread {} renamed to {}", args.thread().name(), name);
    args.thread_mut().set_name(&name);
    Ok(())
}

/// 0x0417 load_and_launch_mission_internal
fn vm_start_mission<C>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let index = args.int(0)?;
    let offsets = args.vm().file().mission_offsets();
    let offset = usize::try_from(index)
        .ok()
        .and_then(|i| offsets.get(i).copied())
        .ok_or(ScriptError::MissionOutOfRange {
            index,
            count: offsets.len(),
        })?;
    log::info!("starting mission {index} at 0x{offset:06X}");
    args.vm_mut().start_thread(offset, true);
    Ok(())
}

pub fn vm_module<C>() -> ScriptModule<C> {
    let mut m = ScriptModule::new("VM");

    m.bind_action(0x0001, vm_sleep, 1, "wait", "Sleep thread");
    m.bind_action(0x0002, vm_jump, 1, "goto", "Jump");

    m.bind_action(0x0004, vm_set_int, 2, "set_var_int", "Set Global Integer");
    m.bind_action(0x0005, vm_set_float, 2, "set_var_float", "Set Global Float");
    m.bind_action(0x0006, vm_set_int, 2, "set_lvar_int", "Set Local Int");
    m.bind_action(0x0007, vm_set_float, 2, "set_lvar_float", "Set Local Float");

    m.bind_action(0x0008, vm_inc_int, 2, "add_val_to_int_var", "Increment Global Int");
    m.bind_action(0x0009, vm_inc_float, 2, "add_val_to_float_var", "Increment Global Float");
    m.bind_action(0x000C, vm_dec_int, 2, "sub_val_from_int_var", "Decrement Global Int");
    m.bind_action(0x000D, vm_dec_float, 2, "sub_val_from_float_var", "Decrement Global Float");
    m.bind_action(0x0015, vm_div_float, 2, "div_float_var_by_val", "Divide Global by Float");

    m.bind_condition(0x0018, vm_int_gt, 2, "is_int_var_greater_than_number", "Global Int Greater than Int");
    m.bind_condition(0x0019, vm_int_gt, 2, "is_int_lvar_greater_than_number", "Local Int Greater than Int");
    m.bind_condition(0x001A, vm_int_gt, 2, "is_number_greater_than_int_var", "Int Greater Than Global Int");
    m.bind_condition(0x001B, vm_int_gt, 2, "is_number_greater_than_int_lvar", "Int Greater Than Var Int");
    m.bind_condition(0x0020, vm_float_gt, 2, "is_float_var_greater_than_number", "Global Float Greater than Float");
    m.bind_condition(0x0028, vm_int_ge, 2, "is_int_var_greater_or_equal_to_number", "Global Int >= Int");
    m.bind_condition(0x0029, vm_int_ge, 2, "is_int_lvar_greater_or_equal_to_number", "Local Int >= Int");
    m.bind_condition(0x002A, vm_int_ge, 2, "is_number_greater_or_equal_to_int_var", "Int >= Global Int");
    m.bind_condition(0x0038, vm_int_eq, 2, "is_int_var_equal_to_number", "Global Int Equal to Int");
    m.bind_condition(0x0039, vm_int_eq, 2, "is_int_lvar_equal_to_number", "Local Int Equal to Int");

    m.bind_action(0x004D, vm_jump_if_false, 1, "goto_if_false", "Jump if false");
    m.bind_action(0x004E, vm_halt_thread, 0, "terminate_this_script", "End Thread");
    m.bind_action(0x004F, vm_new_thread, -1, "start_new_script", "Start New Thread");
    m.bind_action(0x0050, vm_call, 1, "gosub", "Gosub");
    m.bind_action(0x0051, vm_return, 0, "return", "Return");

    m.bind_action(0x0060, vm_dec_int, 2, "sub_int_var_from_int_var", "Decrement Global Integer by Global Integer");
    m.bind_action(0x0061, vm_dec_float, 2, "sub_float_var_from_float_var", "Decrement Global Float by Global Float");
    m.bind_action(0x0084, vm_set_int, 2, "set_var_int_to_var_int", "Set Global Int To Global");
    m.bind_action(0x0086, vm_set_float, 2, "set_var_float_to_var_float", "Set Global Float To Global");

    m.bind(
        0x00D6,
        ScriptFunctionMeta::action(vm_if, 1, "andor", "If").with_flags(OpcodeFlags::OPENS_CONDITION),
    );
    m.bind_action(0x00D7, vm_new_mission_thread, 1, "launch_mission", "Start Mission Thread");
    m.bind_action(0x02CD, vm_call, 2, "gosub_file", "Call");
    m.bind_action(0x03A4, vm_name_thread, 1, "script_name", "Name Thread");
    m.bind_action(0x0417, vm_start_mission, 1, "load_and_launch_mission_internal", "Start Mission");

    m
}
