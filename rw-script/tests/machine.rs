use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use rw_script::*;

const G0: u16 = 8;
const G1: u16 = 12;
const G2: u16 = 16;

#[derive(Debug, Default)]
struct World {
    hour: i32,
    minute: i32,
    flag: Option<GlobalRef>,
    cleared: u32,
    total_missions: i32,
    wasted: bool,
    skip_pressed: bool,
    seen: Vec<String>,
    found: Option<ScmAddress>,
    saved: Option<ScriptSnapshot>,
}

impl ScriptHost for World {
    fn hour(&self) -> i32 {
        self.hour
    }

    fn minute(&self) -> i32 {
        self.minute
    }

    fn set_time_of_day(&mut self, hour: i32, minute: i32) {
        self.hour = hour;
        self.minute = minute;
    }

    fn clear_mission_objects(&mut self) {
        self.cleared += 1;
    }

    fn mission_flag(&self) -> Option<GlobalRef> {
        self.flag
    }

    fn link_mission_flag(&mut self, flag: GlobalRef) {
        self.flag = Some(flag);
    }

    fn set_total_missions(&mut self, count: i32) {
        self.total_missions = count;
    }

    fn player_wasted_or_busted(&self) -> bool {
        self.wasted
    }

    fn wait_skip_pressed(&self) -> bool {
        self.skip_pressed
    }
}

fn assemble(build: impl FnOnce(&mut ScriptWriter)) -> ScmFile {
    let builder = ScmFileBuilder::new().globals(32);
    let mut w = ScriptWriter::new(builder.code_start());
    build(&mut w);
    builder.main_code(w.finish().unwrap()).build_file().unwrap()
}

fn boot(file: ScmFile) -> ScriptMachine<World> {
    let start = file.code_section();
    let mut vm = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    vm.start_thread(start, false);
    vm
}

fn global(vm: &ScriptMachine<World>, offset: u16) -> i32 {
    vm.read_global_i32(GlobalRef(offset)).unwrap()
}

fn set_global(w: &mut ScriptWriter, offset: u16, v: i32) {
    w.opcode(0x0004).global(offset).int(v);
}

fn if_program(g0: i32) -> ScmFile {
    assemble(|w| {
        set_global(w, G0, g0);
        w.opcode(0x00D6).int(0);
        w.opcode(0x0018).global(G0).int(3);
        w.opcode(0x004D).label_abs("end");
        set_global(w, G1, 1);
        w.label("end").opcode(0x004E);
    })
}

#[test]
fn if_true_falls_through() {
    let mut vm = boot(if_program(5));
    vm.execute(0.016).unwrap();
    assert_eq!(global(&vm, G1), 1);
    assert!(vm.threads().is_empty());
}

#[test]
fn if_false_jumps() {
    let mut vm = boot(if_program(2));
    vm.execute(0.016).unwrap();
    assert_eq!(global(&vm, G1), 0);
    assert!(vm.threads().is_empty());
}

#[test]
fn wait_counts_down_across_passes() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0001).int(500);
        set_global(w, G0, 1);
        w.opcode(0x004E);
    }));

    // the pass that issues the wait does not count towards it
    for _ in 0..5 {
        vm.execute(0.1).unwrap();
        assert_eq!(global(&vm, G0), 0);
    }
    assert_eq!(vm.threads()[0].wake_counter(), 100);

    vm.execute(0.1).unwrap();
    assert_eq!(global(&vm, G0), 1);
}

#[test]
fn wait_zero_yields_one_pass() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0001).int(0);
        set_global(w, G0, 1);
        w.opcode(0x004E);
    }));

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G0), 0);
    assert_eq!(vm.threads()[0].wake_counter(), 0);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G0), 1);
}

fn and_program(values: [i32; 3]) -> ScmFile {
    assemble(|w| {
        set_global(w, G0, 1);
        w.opcode(0x00D6).int(2);
        for v in values {
            w.opcode(0x0038).global(G0).int(v);
        }
        w.opcode(0x004D).label_abs("fail");
        set_global(w, G1, 1);
        w.opcode(0x004E);
        w.label("fail");
        set_global(w, G1, 2);
        w.opcode(0x004E);
    })
}

#[test]
fn and_group_fails_on_one_false() {
    let mut vm = boot(and_program([1, 2, 1]));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 2);
}

#[test]
fn and_group_passes_when_all_true() {
    let mut vm = boot(and_program([1, 1, 1]));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 1);
}

fn or_program(compare: i32) -> ScmFile {
    assemble(|w| {
        w.opcode(0x00D6).int(20);
        w.opcode(0x0038).global(G0).int(compare);
        w.opcode(0x004D).label_abs("fail");
        set_global(w, G1, 1);
        w.opcode(0x004E);
        w.label("fail");
        set_global(w, G1, 2);
        w.opcode(0x004E);
    })
}

#[test]
fn or_group_single_condition() {
    let mut vm = boot(or_program(1));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 2);

    let mut vm = boot(or_program(0));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 1);
}

#[test]
fn negated_condition_inverts_before_fold() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x00D6).int(0);
        w.negated(0x0038).global(G0).int(1);
        w.opcode(0x004D).label_abs("fail");
        set_global(w, G1, 1);
        w.label("fail").opcode(0x004E);
    }));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 1);
}

#[test]
fn gosub_returns_to_next_instruction() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0050).label_abs("sub");
        set_global(w, G0, 7);
        w.opcode(0x004E);
        w.label("sub");
        set_global(w, G1, 3);
        w.opcode(0x0051);
    }));
    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G0), 7);
    assert_eq!(global(&vm, G1), 3);
}

#[test]
fn recursion_overflows_the_call_stack() {
    let mut vm = boot(assemble(|w| {
        w.label("again").opcode(0x0050).label_abs("again");
    }));
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::CallStackOverflow {
            depth: SCM_STACK_DEPTH,
            thread: "THREAD".into()
        })
    );
}

#[test]
fn return_without_gosub_underflows() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0051);
    }));
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::CallStackUnderflow {
            thread: "THREAD".into()
        })
    );
}

#[test]
fn new_threads_start_next_pass() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x004F).label_abs("child").int(5).end();
        w.opcode(0x004E);
        w.label("child");
        w.opcode(0x0084).global(G0).local(0);
        set_global(w, G1, 1);
        w.opcode(0x004E);
    }));

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 0);
    assert!(vm.threads().is_empty());
    assert_eq!(vm.pending_threads().len(), 1);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 1);
    assert_eq!(global(&vm, G0), 5);
}

#[test]
fn threads_run_in_creation_order() {
    let mut second = 0;
    let file = assemble(|w| {
        set_global(w, G0, 1);
        w.opcode(0x004E);
        second = w.address();
        // sees the write from the first thread within the same pass
        w.opcode(0x0084).global(G1).global(G0);
        w.opcode(0x004E);
    });
    let start = file.code_section();
    let mut vm = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    vm.start_thread(start, false);
    vm.start_thread(second, false);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 1);
}

#[test]
fn timer_locals_accumulate_elapsed_time() {
    let mut vm = boot(assemble(|w| {
        w.label("loop").opcode(0x0001).int(0);
        w.opcode(0x0002).label_abs("loop");
    }));
    for _ in 0..3 {
        vm.execute(0.05).unwrap();
    }
    let t = &vm.threads()[0];
    assert_eq!(t.read_local_i32(16).unwrap(), 150);
    assert_eq!(t.read_local_i32(17).unwrap(), 150);
}

#[test]
fn illegal_instruction_aborts_the_pass() {
    let file = assemble(|w| {
        w.opcode(0x0FFF);
    });
    let start = file.code_section();
    let mut vm = boot(file);
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::IllegalInstruction {
            opcode: 0x0FFF,
            offset: start,
            thread: "THREAD".into()
        })
    );
    assert_eq!(vm.threads().len(), 1);
}

#[test]
fn illegal_instruction_can_be_isolated() {
    let file = assemble(|w| {
        w.opcode(0x0FFF);
        set_global(w, G0, 1);
        w.opcode(0x004E);
    });
    let start = file.code_section();
    let config = MachineConfig::default().with_fault_policy(FaultPolicy::TerminateThread);
    let mut vm = ScriptMachine::with_config(file, ScmOpcodes::standard(), World::default(), config);
    vm.start_thread(start, false);
    vm.start_thread(start + 2, false);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G0), 1);
    assert!(vm.threads().is_empty());
}

#[test]
fn out_of_bounds_global_is_rejected_untouched() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0004).global(0x7FF0).int(1);
    }));
    let size = vm.globals().len();
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::GlobalOutOfBounds { offset: 0x7FF0, size })
    );
    assert!(vm.globals().iter().all(|&b| b == 0));
}

#[test]
fn out_of_bounds_local_is_rejected() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0006).local(300).int(1);
    }));
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::LocalOutOfBounds { index: 300, size: 256 })
    );
}

#[test]
fn float_arithmetic() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0005).global(G0).float16(2.5);
        w.opcode(0x0009).global(G0).float16(1.0);
        w.opcode(0x0015).global(G0).float16(0.5);
        w.opcode(0x0007).local(2).float16(6.0);
        w.opcode(0x0061).global(G0).local(2);
        w.opcode(0x004E);
    }));
    vm.execute(0.0).unwrap();
    assert_eq!(vm.read_global_f32(GlobalRef(G0)).unwrap(), 1.0);
}

#[test]
fn breakpoint_on_address_sees_only_that_instruction() {
    let mut second = 0;
    let file = assemble(|w| {
        set_global(w, G0, 1);
        second = w.address();
        set_global(w, G1, 2);
        w.opcode(0x004E);
    });
    let mut vm = boot(file);

    let hits = Rc::new(RefCell::new(Vec::new()));
    let sink = hits.clone();
    vm.set_breakpoint_handler(move |info| {
        sink.borrow_mut().push((
            info.pc,
            info.thread.name().to_string(),
            info.signature,
            info.operands.to_vec(),
            info.vm.read_global_i32(GlobalRef(G0)).unwrap(),
            info.vm.threads().len(),
        ));
    });
    vm.add_breakpoint(Breakpoint::at(second));
    vm.execute(0.0).unwrap();

    assert_eq!(
        *hits.borrow(),
        vec![(
            second,
            "THREAD".to_string(),
            "set_var_int",
            vec![Operand::Global(GlobalRef(G1)), Operand::Int8(2)],
            1,
            1
        )]
    );
}

#[test]
fn removed_breakpoints_stop_firing() {
    let file = assemble(|w| {
        w.label("loop").opcode(0x0001).int(0);
        w.opcode(0x0002).label_abs("loop");
    });
    let start = file.code_section();
    let mut vm = boot(file);

    let hits = Rc::new(RefCell::new(Vec::new()));
    let sink = hits.clone();
    vm.set_breakpoint_handler(move |info| sink.borrow_mut().push(info.pc));
    vm.add_breakpoint(Breakpoint::at(start));
    vm.add_breakpoint(Breakpoint::on_thread("PAGER"));

    vm.execute(0.0).unwrap();
    vm.execute(0.0).unwrap();
    assert_eq!(*hits.borrow(), vec![start, start]);

    vm.remove_breakpoint(&Breakpoint::at(start));
    assert_eq!(vm.breakpoints(), &[Breakpoint::on_thread("PAGER")]);
    vm.execute(0.0).unwrap();
    assert_eq!(hits.borrow().len(), 2);
}

#[test]
fn breakpoint_on_thread_name() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x03A4).implicit_string("MAIN").unwrap();
        set_global(w, G0, 1);
        w.opcode(0x004E);
    }));

    let hits = Rc::new(RefCell::new(Vec::new()));
    let sink = hits.clone();
    vm.set_breakpoint_handler(move |info| sink.borrow_mut().push(info.opcode));
    vm.add_breakpoint(Breakpoint::on_thread("MAIN"));
    vm.execute(0.0).unwrap();

    assert_eq!(*hits.borrow(), vec![0x0004, 0x004E]);
}

#[test]
fn missions_start_from_the_offset_table() {
    let builder = ScmFileBuilder::new().globals(32).reserve_missions(1);
    let mut main = ScriptWriter::new(builder.code_start());
    main.opcode(0x0417).int(0);
    main.opcode(0x004E);
    let builder = builder.main_code(main.finish().unwrap());

    let origin = builder.next_mission_address();
    let mut mission = ScriptWriter::new(origin);
    mission.opcode(0x0002).label_rel("body", origin);
    set_global(&mut mission, G0, 99);
    mission.label("body");
    set_global(&mut mission, G1, 3);
    mission.opcode(0x004E);
    let file = builder.mission(mission.finish().unwrap()).build_file().unwrap();

    let mut vm = boot(file);
    vm.execute(0.0).unwrap();
    let pending = vm.pending_threads();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].is_mission());
    assert_eq!(pending[0].base_address(), origin);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G0), 0);
    assert_eq!(global(&vm, G1), 3);
}

#[test]
fn missing_mission_is_an_error() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x0417).int(4);
    }));
    assert_eq!(
        vm.execute(0.0),
        Err(ScriptError::MissionOutOfRange { index: 4, count: 0 })
    );
}

#[test]
fn game_opcodes_reach_the_host() {
    let mut vm = boot(assemble(|w| {
        w.opcode(0x00C0).int(12).int(30);
        w.opcode(0x00BF).global(G0).global(G1);
        w.opcode(0x0180).global(G2);
        w.opcode(0x0111).int(1);
        w.opcode(0x0084).local(0).global(G2);
        w.opcode(0x00D8);
        w.opcode(0x042C).int(5);
        w.opcode(0x0001).int(0);
    }));
    vm.execute(0.0).unwrap();

    assert_eq!(global(&vm, G0), 12);
    assert_eq!(global(&vm, G1), 30);
    assert_eq!(vm.threads()[0].read_local_i32(0).unwrap(), 1);
    assert_eq!(global(&vm, G2), 0);

    let world = vm.state();
    assert_eq!(world.flag, Some(GlobalRef(G2)));
    assert_eq!(world.cleared, 1);
    assert_eq!(world.total_missions, 5);
}

#[test]
fn snapshot_restores_globals_and_threads() {
    let file = assemble(|w| {
        set_global(w, G0, 9);
        w.opcode(0x0001).int(1000);
        w.opcode(0x004E);
    });
    let mut vm = boot(file.clone());
    vm.execute(0.0).unwrap();
    let snap = vm.snapshot();

    let path = std::env::temp_dir().join(format!("rw-script-snapshot-{}.bin", std::process::id()));
    snap.save_to_file(&path).unwrap();
    let loaded = ScriptSnapshot::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, snap);

    let mut fresh = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    fresh.restore(loaded).unwrap();
    assert_eq!(global(&fresh, G0), 9);
    assert_eq!(fresh.threads().len(), 1);
    assert_eq!(fresh.threads()[0].pc(), vm.threads()[0].pc());
    assert_eq!(fresh.threads()[0].wake_counter(), 1000);
}

#[test]
fn snapshot_from_another_script_is_refused() {
    let mut vm = boot(assemble(|_| {}));
    let snap = ScriptSnapshot {
        globals: vec![0; 3],
        threads: Vec::new(),
    };
    assert!(vm.restore(snap).is_err());
}

fn inspect(args: &mut ScriptArguments<'_, World>) -> ScriptResult<()> {
    let vm = args.vm();
    let seen = vm.threads().iter().map(|t| t.name().to_string()).collect();
    let found = vm.find_thread("MAIN").map(ScmThread::pc);
    let saved = vm.snapshot();

    let world = args.state_mut();
    world.seen = seen;
    world.found = found;
    world.saved = Some(saved);
    Ok(())
}

#[test]
fn handlers_see_the_running_thread() {
    let mut resume = 0;
    let file = assemble(|w| {
        w.opcode(0x03A4).implicit_string("MAIN").unwrap();
        w.opcode(0x0A00);
        resume = w.address();
        set_global(w, G0, 5);
        w.opcode(0x004E);
    });
    let start = file.code_section();
    let mut debug = ScriptModule::new("Debug");
    debug.bind_action(0x0A00, inspect, 0, "inspect_machine", "Inspect Machine");
    let opcodes = ScmOpcodes::standard().with_module(debug);
    let mut vm = ScriptMachine::new(file.clone(), opcodes, World::default());
    vm.start_thread(start, false);

    vm.execute(0.0).unwrap();
    assert_eq!(vm.state().seen, vec!["MAIN".to_string()]);
    assert_eq!(vm.state().found, Some(resume));

    let saved = vm.state_mut().saved.take().unwrap();
    assert_eq!(saved.threads.len(), 1);
    assert_eq!(saved.threads[0].pc(), resume);

    let mut fresh = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    fresh.restore(saved).unwrap();
    assert_eq!(global(&fresh, G0), 0);
    fresh.execute(0.0).unwrap();
    assert_eq!(global(&fresh, G0), 5);
    assert!(fresh.threads().is_empty());
}

#[test]
fn relative_labels_resolve_against_thread_base() {
    let mut child = 0;
    let file = assemble(|w| {
        let base = w.address();
        w.opcode(0x0050).label_rel("sub", base);
        w.opcode(0x00D6).int(0);
        w.opcode(0x0038).global(G0).int(1);
        w.opcode(0x004D).label_rel("spawn", base);
        set_global(w, G1, 99);
        w.label("spawn");
        w.opcode(0x004F).label_rel("child", base).int(4).end();
        w.opcode(0x004E);
        w.label("sub");
        set_global(w, G2, 7);
        w.opcode(0x0051);
        child = w.address();
        w.label("child");
        w.opcode(0x0084).global(G1).local(0);
        w.opcode(0x004E);
    });
    let mut vm = boot(file);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G2), 7);
    assert_eq!(global(&vm, G1), 0);
    assert_eq!(vm.pending_threads().len(), 1);
    assert_eq!(vm.pending_threads()[0].base_address(), child);

    vm.execute(0.0).unwrap();
    assert_eq!(global(&vm, G1), 4);
    assert!(vm.threads().is_empty());
}

fn mission_with_cleanup() -> ScmFile {
    assemble(|w| {
        w.opcode(0x0050).label_abs("body");
        w.opcode(0x00D6).int(0);
        w.opcode(0x0112);
        w.opcode(0x004D).label_abs("done");
        set_global(w, G1, 1);
        w.label("done").opcode(0x004E);
        w.label("body").opcode(0x0001).int(0);
        w.opcode(0x0002).label_abs("body");
    })
}

fn run_until_wasted(is_mission: bool, check: bool) -> ScriptMachine<World> {
    let file = mission_with_cleanup();
    let start = file.code_section();
    let mut vm = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    vm.start_thread(start, is_mission).set_death_or_arrest_check(check);

    vm.execute(0.0).unwrap();
    assert_eq!(vm.threads()[0].call_depth(), 1);
    vm.state_mut().wasted = true;
    vm.execute(0.0).unwrap();
    vm
}

#[test]
fn death_or_arrest_unwinds_mission_threads() {
    let vm = run_until_wasted(true, true);
    assert_eq!(global(&vm, G1), 1);
    assert!(vm.threads().is_empty());
}

#[test]
fn death_or_arrest_leaves_other_threads_alone() {
    for (is_mission, check) in [(false, true), (true, false)] {
        let vm = run_until_wasted(is_mission, check);
        assert_eq!(global(&vm, G1), 0);
        let thread = &vm.threads()[0];
        assert!(!thread.wasted_or_busted());
        assert_eq!(thread.call_depth(), 1);
    }
}

#[test]
fn skip_wakes_only_threads_that_allow_it() {
    let file = assemble(|w| {
        w.opcode(0x0001).int(10000);
        w.opcode(0x0008).global(G0).int(1);
        w.opcode(0x004E);
    });
    let start = file.code_section();
    let mut vm = ScriptMachine::new(file, ScmOpcodes::standard(), World::default());
    vm.start_thread(start, false).set_allow_wait_skip(true);
    vm.start_thread(start, false);

    vm.execute(0.1).unwrap();
    vm.execute(0.1).unwrap();
    assert_eq!(global(&vm, G0), 0);

    vm.state_mut().skip_pressed = true;
    vm.execute(0.1).unwrap();
    assert_eq!(global(&vm, G0), 1);
    assert_eq!(vm.threads().len(), 1);
    assert_eq!(vm.threads()[0].wake_counter(), 9800);
    assert!(!vm.threads()[0].allow_wait_skip());
}
