//! World-facing opcodes. The world itself stays behind [`ScriptHost`].

use crate::error::ScriptResult;
use crate::machine::ScriptArguments;
use crate::opcodes::ScriptModule;
use crate::types::GlobalRef;

/// The game state that script opcodes read and mutate.
///
/// Every method defaults to doing nothing so hosts only implement what they
/// support.
pub trait ScriptHost {
    fn hour(&self) -> i32 {
        0
    }

    fn minute(&self) -> i32 {
        0
    }

    fn set_time_of_day(&mut self, _hour: i32, _minute: i32) {}

    /// Destroy everything spawned for the current mission.
    fn clear_mission_objects(&mut self) {}

    /// The global the script uses as its ONMISSION flag, once linked.
    fn mission_flag(&self) -> Option<GlobalRef> {
        None
    }

    fn link_mission_flag(&mut self, _flag: GlobalRef) {}

    fn set_total_missions(&mut self, _count: i32) {}

    /// Polled before each thread runs. Mission threads unwind while true.
    fn player_wasted_or_busted(&self) -> bool {
        false
    }

    /// Polled before each thread runs. Wakes threads that allow their wait
    /// to be skipped.
    fn wait_skip_pressed(&self) -> bool {
        false
    }
}

impl ScriptHost for () {}

type Args<'a, C> = ScriptArguments<'a, C>;

fn write_mission_flag<C: ScriptHost>(args: &mut Args<'_, C>, v: i32) -> ScriptResult<()> {
    match args.state().mission_flag() {
        Some(flag) => args.vm_mut().write_global_i32(flag, v),
        None => {
            log::warn!("mission flag written before it was linked");
            Ok(())
        }
    }
}

/// 0x00BF get_time_of_day
fn game_get_time<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let (hour, minute) = (args.state().hour(), args.state().minute());
    args.set_int(0, hour)?;
    args.set_int(1, minute)
}

/// 0x00C0 set_time_of_day
fn game_set_time<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let (hour, minute) = (args.int(0)?, args.int(1)?);
    args.state_mut().set_time_of_day(hour, minute);
    Ok(())
}

/// 0x00D8 mission_has_finished
fn game_mission_over<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    args.state_mut().clear_mission_objects();
    write_mission_flag(args, 0)
}

fn game_set_dead_or_arrested<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let v = args.int(0)?;
    write_mission_flag(args, v)
}

/// 0x0112 has_deatharrest_been_executed
fn game_is_wasted_or_busted<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<bool> {
    Ok(args.thread().wasted_or_busted())
}

/// 0x0180 declare_mission_flag
fn game_link_mission_flag<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let flag = args.global_ref(0)?;
    args.state_mut().link_mission_flag(flag);
    Ok(())
}

fn game_set_total_missions<C: ScriptHost>(args: &mut Args<'_, C>) -> ScriptResult<()> {
    let count = args.int(0)?;
    log::info!("total missions: {count}");
    args.state_mut().set_total_missions(count);
    Ok(())
}

pub fn game_module<C: ScriptHost>() -> ScriptModule<C> {
    let mut m = ScriptModule::new("Game");

    m.bind_action(0x00BF, game_get_time, 2, "get_time_of_day", "Get Time of Day");
    m.bind_action(0x00C0, game_set_time, 2, "set_time_of_day", "Set Time of Day");
    m.bind_action(0x00D8, game_mission_over, 0, "mission_has_finished", "Set Mission Finished");
    m.bind_action(0x0111, game_set_dead_or_arrested, 1, "set_deatharrest_state", "Set Dead or Arrested");
    m.bind_condition(0x0112, game_is_wasted_or_busted, 0, "has_deatharrest_been_executed", "Is Wasted or Busted");
    m.bind_action(0x0180, game_link_mission_flag, 1, "declare_mission_flag", "Link ONMISSION Flag");
    m.bind_action(0x042C, game_set_total_missions, 1, "set_total_number_of_missions", "Set Total Missions");

    m
}
