use std::fmt::Write as _;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::config::{FaultPolicy, MachineConfig};
use crate::decode::{decode_instruction, DecodedInstruction};
use crate::error::{ScriptError, ScriptResult};
use crate::file::ScmFile;
use crate::modules::game::ScriptHost;
use crate::opcodes::{ScmOpcodes, ScriptFunction, ScriptFunctionMeta};
use crate::thread::ScmThread;
use crate::types::*;

/// Matches instructions by address, thread name, or both.
///
/// A breakpoint with neither set matches every instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Breakpoint {
    pub pc: Option<ScmAddress>,
    pub thread: Option<String>,
}

impl Breakpoint {
    pub fn at(pc: ScmAddress) -> Self {
        Self {
            pc: Some(pc),
            thread: None,
        }
    }

    pub fn on_thread(name: &str) -> Self {
        Self {
            pc: None,
            thread: Some(name.to_string()),
        }
    }

    pub fn with_thread(mut self, name: &str) -> Self {
        self.thread = Some(name.to_string());
        self
    }

    pub fn matches(&self, pc: ScmAddress, thread: &str) -> bool {
        self.pc.map_or(true, |p| p == pc) && self.thread.as_deref().map_or(true, |n| n == thread)
    }
}

/// What a breakpoint handler sees: the decoded instruction before it runs,
/// plus read access to the whole machine.
pub struct BreakpointInfo<'a, C> {
    pub pc: ScmAddress,
    pub thread: &'a ScmThread,
    pub opcode: ScmOpcode,
    pub negated: bool,
    pub signature: &'static str,
    pub operands: &'a [Operand],
    pub vm: &'a ScriptMachine<C>,
}

pub type BreakpointHandler<C> = Box<dyn FnMut(&BreakpointInfo<'_, C>)>;

/// The script virtual machine.
///
/// `C` is the host context that game opcodes act on. The machine owns it for
/// the lifetime of the script so handlers reach it through
/// [`ScriptArguments::state_mut`].
pub struct ScriptMachine<C> {
    pub(crate) file: ScmFile,
    pub(crate) opcodes: ScmOpcodes<C>,
    pub(crate) state: C,
    pub(crate) config: MachineConfig,
    pub(crate) threads: Vec<ScmThread>,
    /// Started since the last pass began; promoted at the next pass.
    pub(crate) pending: Vec<ScmThread>,
    pub(crate) globals: Vec<u8>,
    /// Index into `threads` of the thread being stepped.
    pub(crate) running: Option<usize>,
    breakpoints: Vec<Breakpoint>,
    breakpoint_handler: Option<BreakpointHandler<C>>,
}

impl<C> ScriptMachine<C> {
    pub fn new(file: ScmFile, opcodes: ScmOpcodes<C>, state: C) -> Self {
        Self::with_config(file, opcodes, state, MachineConfig::default())
    }

    pub fn with_config(file: ScmFile, opcodes: ScmOpcodes<C>, state: C, config: MachineConfig) -> Self {
        let globals = vec![0u8; file.globals_size()];
        log::info!(
            "script machine: {} bytes of globals, {} missions, fault policy {:?}",
            globals.len(),
            file.mission_offsets().len(),
            config.fault_policy
        );
        Self {
            file,
            opcodes,
            state,
            config,
            threads: Vec::new(),
            pending: Vec::new(),
            globals,
            running: None,
            breakpoints: Vec::new(),
            breakpoint_handler: None,
        }
    }

    pub fn file(&self) -> &ScmFile {
        &self.file
    }

    pub fn opcodes(&self) -> &ScmOpcodes<C> {
        &self.opcodes
    }

    pub fn state(&self) -> &C {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut C {
        &mut self.state
    }

    pub fn into_state(self) -> C {
        self.state
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MachineConfig) {
        self.config = config;
    }

    /// Threads that take part in the next pass, in execution order.
    pub fn threads(&self) -> &[ScmThread] {
        &self.threads
    }

    /// Threads started during the current pass.
    pub fn pending_threads(&self) -> &[ScmThread] {
        &self.pending
    }

    pub fn find_thread(&self, name: &str) -> Option<&ScmThread> {
        self.threads.iter().chain(&self.pending).find(|t| t.name() == name)
    }

    /// Start a thread at `start`. It first runs on the next call to
    /// [`execute`](ScriptMachine::execute).
    pub fn start_thread(&mut self, start: ScmAddress, is_mission: bool) -> &mut ScmThread {
        log::debug!("starting thread at 0x{start:06X} (mission={is_mission})");
        self.pending.push(ScmThread::new(start, is_mission));
        let last = self.pending.len() - 1;
        &mut self.pending[last]
    }

    pub fn globals(&self) -> &[u8] {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut [u8] {
        &mut self.globals
    }

    /// Copy of global memory for persisting.
    pub fn global_data(&self) -> Vec<u8> {
        self.globals.clone()
    }

    fn global_range(&self, global: GlobalRef) -> ScriptResult<Range<usize>> {
        let offset = global.offset();
        if offset + SCM_VARIABLE_SIZE > self.globals.len() {
            return Err(ScriptError::GlobalOutOfBounds {
                offset,
                size: self.globals.len(),
            });
        }
        Ok(offset..offset + SCM_VARIABLE_SIZE)
    }

    pub fn read_global_word(&self, global: GlobalRef) -> ScriptResult<[u8; SCM_VARIABLE_SIZE]> {
        let mut out = [0u8; SCM_VARIABLE_SIZE];
        out.copy_from_slice(&self.globals[self.global_range(global)?]);
        Ok(out)
    }

    pub fn write_global_word(&mut self, global: GlobalRef, word: [u8; SCM_VARIABLE_SIZE]) -> ScriptResult<()> {
        let range = self.global_range(global)?;
        self.globals[range].copy_from_slice(&word);
        Ok(())
    }

    pub fn read_global_i32(&self, global: GlobalRef) -> ScriptResult<i32> {
        Ok(LittleEndian::read_i32(&self.read_global_word(global)?))
    }

    pub fn write_global_i32(&mut self, global: GlobalRef, v: i32) -> ScriptResult<()> {
        self.write_global_word(global, v.to_le_bytes())
    }

    pub fn read_global_f32(&self, global: GlobalRef) -> ScriptResult<f32> {
        Ok(LittleEndian::read_f32(&self.read_global_word(global)?))
    }

    pub fn write_global_f32(&mut self, global: GlobalRef, v: f32) -> ScriptResult<()> {
        self.write_global_word(global, v.to_le_bytes())
    }

    pub fn add_breakpoint(&mut self, bp: Breakpoint) {
        if !self.breakpoints.contains(&bp) {
            self.breakpoints.push(bp);
        }
    }

    pub fn remove_breakpoint(&mut self, bp: &Breakpoint) {
        self.breakpoints.retain(|b| b != bp);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn set_breakpoint_handler(&mut self, handler: impl FnMut(&BreakpointInfo<'_, C>) + 'static) {
        self.breakpoint_handler = Some(Box::new(handler));
    }

    pub fn clear_breakpoint_handler(&mut self) {
        self.breakpoint_handler = None;
    }

    fn step(&mut self, index: usize) -> ScriptResult<()> {
        let thread = &self.threads[index];
        let (decoded, meta) = decode_instruction(&self.file, &self.opcodes, thread.pc(), thread.name())?;
        self.check_references(&decoded.operands)?;

        if self.config.traces(self.threads[index].name()) {
            self.trace(&self.threads[index], &decoded, &meta);
        }
        self.hit_breakpoints(index, &decoded, &meta);

        self.threads[index].set_pc(decoded.next_pc);

        let mut args = ScriptArguments {
            parameters: &decoded.operands,
            index,
            machine: &mut *self,
        };
        match meta.function {
            Some(ScriptFunction::Action(f)) => f(&mut args)?,
            Some(ScriptFunction::Condition(f)) => {
                let result = f(&mut args)?;
                args.thread_mut().set_condition_result(result);
            }
            None => {}
        }

        let thread = &mut self.threads[index];
        if decoded.negated {
            thread.negate_condition();
        }
        if !meta.opens_condition() {
            thread.fold_condition();
        }
        Ok(())
    }

    /// Reject variable references that fall outside their banks before any
    /// handler can touch them.
    fn check_references(&self, operands: &[Operand]) -> ScriptResult<()> {
        for op in operands {
            match *op {
                Operand::Global(g) => {
                    self.global_range(g)?;
                }
                Operand::Local(l) if l.index() >= SCM_THREAD_LOCAL_SIZE => {
                    return Err(ScriptError::LocalOutOfBounds {
                        index: l.index(),
                        size: SCM_THREAD_LOCAL_SIZE,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn hit_breakpoints(&mut self, index: usize, decoded: &DecodedInstruction, meta: &ScriptFunctionMeta<C>) {
        let name = self.threads[index].name();
        if self.breakpoint_handler.is_none() || !self.breakpoints.iter().any(|b| b.matches(decoded.address, name)) {
            return;
        }
        if let Some(mut handler) = self.breakpoint_handler.take() {
            let info = BreakpointInfo {
                pc: decoded.address,
                thread: &self.threads[index],
                opcode: decoded.opcode,
                negated: decoded.negated,
                signature: meta.signature,
                operands: &decoded.operands,
                vm: &*self,
            };
            handler(&info);
            self.breakpoint_handler = Some(handler);
        }
    }

    fn trace(&self, thread: &ScmThread, decoded: &DecodedInstruction, meta: &ScriptFunctionMeta<C>) {
        let mut line = String::new();
        for op in &decoded.operands {
            let _ = write!(line, " {op}");
        }
        log::trace!(
            "{:<16} {} {:06x} {}{:04x} {}{}",
            thread.name(),
            thread.condition_result() as u8,
            decoded.address,
            if decoded.negated { "!" } else { " " },
            decoded.opcode,
            meta.signature,
            line
        );
    }
}

impl<C: ScriptHost> ScriptMachine<C> {
    /// Run one pass over every live thread, `dt` seconds after the last.
    ///
    /// Threads started during the pass wait for the next one; threads that
    /// finished are dropped at the end of it.
    pub fn execute(&mut self, dt: f32) -> ScriptResult<()> {
        if self.running.is_some() {
            return Err(ScriptError::ReentrantExecute);
        }
        let ms = (dt * 1000.0) as i32;
        self.threads.append(&mut self.pending);

        let mut result = Ok(());
        for i in 0..self.threads.len() {
            self.running = Some(i);
            let outcome = self.execute_thread(i, ms);
            self.running = None;

            if let Err(e) = outcome {
                log::error!("script fault: {e}");
                match self.config.fault_policy {
                    FaultPolicy::Abort => {
                        result = Err(e);
                        break;
                    }
                    FaultPolicy::TerminateThread => {
                        log::warn!("terminating thread {}", self.threads[i].name());
                        self.threads[i].terminate();
                    }
                }
            }
        }

        self.threads.retain(|t| {
            if t.is_finished() {
                log::debug!("thread {} finished", t.name());
            }
            !t.is_finished()
        });
        result
    }

    fn execute_thread(&mut self, index: usize, ms: i32) -> ScriptResult<()> {
        let player_down = self.state.player_wasted_or_busted();
        let skip_pressed = self.state.wait_skip_pressed();

        let thread = &mut self.threads[index];
        if player_down && thread.abort_mission() {
            log::info!("mission thread {} unwound after death or arrest", thread.name());
        }
        if skip_pressed {
            thread.skip_wait();
        }
        thread.tick_sleep(ms);
        if thread.wake_counter() > 0 {
            return Ok(());
        }

        while self.threads[index].is_runnable() {
            self.step(index)?;
        }

        self.threads[index].end_pass(ms);
        Ok(())
    }
}

/// Handler view of one executing instruction.
///
/// The running thread stays in the machine's thread list, so handlers that
/// look through [`vm`](ScriptArguments::vm) see it too.
pub struct ScriptArguments<'a, C> {
    parameters: &'a [Operand],
    index: usize,
    machine: &'a mut ScriptMachine<C>,
}

impl<'a, C> ScriptArguments<'a, C> {
    pub fn parameters(&self) -> &[Operand] {
        self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn thread(&self) -> &ScmThread {
        &self.machine.threads[self.index]
    }

    pub fn thread_mut(&mut self) -> &mut ScmThread {
        &mut self.machine.threads[self.index]
    }

    pub fn vm(&self) -> &ScriptMachine<C> {
        &*self.machine
    }

    pub fn vm_mut(&mut self) -> &mut ScriptMachine<C> {
        &mut *self.machine
    }

    pub fn state(&self) -> &C {
        &self.machine.state
    }

    pub fn state_mut(&mut self) -> &mut C {
        &mut self.machine.state
    }

    pub fn operand(&self, index: usize) -> ScriptResult<Operand> {
        self.parameters
            .get(index)
            .copied()
            .ok_or(ScriptError::MissingArgument {
                index,
                count: self.parameters.len(),
            })
    }

    /// Integer value of an immediate or a variable.
    pub fn int(&self, index: usize) -> ScriptResult<i32> {
        match self.operand(index)? {
            Operand::Global(g) => self.machine.read_global_i32(g),
            Operand::Local(l) => self.thread().read_local_i32(l.index()),
            op => op.immediate_int().ok_or(ScriptError::TypeMismatch {
                index,
                expected: "an integer",
            }),
        }
    }

    /// Float value of an immediate or a variable.
    pub fn real(&self, index: usize) -> ScriptResult<f32> {
        match self.operand(index)? {
            Operand::Global(g) => self.machine.read_global_f32(g),
            Operand::Local(l) => self.thread().read_local_f32(l.index()),
            op => op.immediate_real().ok_or(ScriptError::TypeMismatch {
                index,
                expected: "a float",
            }),
        }
    }

    /// Raw 4-byte value, for copying operands whose type the handler does
    /// not care about.
    pub fn word(&self, index: usize) -> ScriptResult<[u8; SCM_VARIABLE_SIZE]> {
        match self.operand(index)? {
            Operand::Global(g) => self.machine.read_global_word(g),
            Operand::Local(l) => self.thread().read_local_word(l.index()),
            Operand::Float16(v) => Ok(v.to_le_bytes()),
            op => op.immediate_int().map(i32::to_le_bytes).ok_or(ScriptError::TypeMismatch {
                index,
                expected: "a value",
            }),
        }
    }

    pub fn string(&self, index: usize) -> ScriptResult<String> {
        match self.operand(index)? {
            Operand::String(s) => Ok(s.to_string_lossy().into_owned()),
            _ => Err(ScriptError::TypeMismatch {
                index,
                expected: "a string",
            }),
        }
    }

    pub fn global_ref(&self, index: usize) -> ScriptResult<GlobalRef> {
        match self.operand(index)? {
            Operand::Global(g) => Ok(g),
            _ => Err(ScriptError::TypeMismatch {
                index,
                expected: "a global variable",
            }),
        }
    }

    pub fn set_word(&mut self, index: usize, word: [u8; SCM_VARIABLE_SIZE]) -> ScriptResult<()> {
        match self.operand(index)? {
            Operand::Global(g) => self.machine.write_global_word(g, word),
            Operand::Local(l) => self.thread_mut().write_local_word(l.index(), word),
            _ => Err(ScriptError::TypeMismatch {
                index,
                expected: "a variable",
            }),
        }
    }

    pub fn set_int(&mut self, index: usize, v: i32) -> ScriptResult<()> {
        self.set_word(index, v.to_le_bytes())
    }

    pub fn set_real(&mut self, index: usize, v: f32) -> ScriptResult<()> {
        self.set_word(index, v.to_le_bytes())
    }
}
