use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};
use crate::types::*;

/// Longest thread name the script can assign.
pub const SCM_THREAD_NAME_LEN: usize = 16;

const LOCALS_BYTES: usize = SCM_THREAD_LOCAL_SIZE * SCM_VARIABLE_SIZE;

/// Execution state of one cooperative script thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScmThread {
    name: String,
    base_address: ScmAddress,
    program_counter: ScmAddress,

    condition_count: u32,
    condition_result: bool,
    condition_mask: u8,
    condition_and: bool,

    /// 0 runnable, >0 milliseconds left to sleep, -1 yield until next pass.
    wake_counter: i32,
    locals: Vec<u8>,
    is_mission: bool,
    finished: bool,
    /// Mission threads unwind when the player dies or is arrested.
    death_or_arrest_check: bool,
    wasted_or_busted: bool,
    allow_wait_skip: bool,

    stack_depth: usize,
    calls: [ScmAddress; SCM_STACK_DEPTH],
}

impl ScmThread {
    pub fn new(start: ScmAddress, is_mission: bool) -> Self {
        Self {
            name: "THREAD".to_string(),
            base_address: start,
            program_counter: start,
            condition_count: 0,
            condition_result: false,
            condition_mask: 0,
            condition_and: false,
            wake_counter: 0,
            locals: vec![0u8; LOCALS_BYTES],
            is_mission,
            finished: false,
            death_or_arrest_check: true,
            wasted_or_busted: false,
            allow_wait_skip: false,
            stack_depth: 0,
            calls: [0; SCM_STACK_DEPTH],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names longer than 16 bytes are cut.
    pub fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(SCM_THREAD_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name = name[..end].to_string();
    }

    pub fn base_address(&self) -> ScmAddress {
        self.base_address
    }

    pub fn pc(&self) -> ScmAddress {
        self.program_counter
    }

    pub fn set_pc(&mut self, pc: ScmAddress) {
        self.program_counter = pc;
    }

    /// Negative labels are offsets from the thread's base address.
    pub fn localize_label(&self, label: i32) -> ScmAddress {
        if label < 0 {
            self.base_address.wrapping_add(label.unsigned_abs())
        } else {
            label as ScmAddress
        }
    }

    pub fn jump(&mut self, label: i32) {
        self.program_counter = self.localize_label(label);
    }

    pub fn is_mission(&self) -> bool {
        self.is_mission
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn wake_counter(&self) -> i32 {
        self.wake_counter
    }

    pub fn is_runnable(&self) -> bool {
        self.wake_counter == 0
    }

    /// Zero or negative yields for the rest of the pass.
    pub fn sleep(&mut self, ms: i32) {
        self.wake_counter = if ms > 0 { ms } else { -1 };
    }

    pub fn yield_once(&mut self) {
        self.wake_counter = -1;
    }

    pub fn terminate(&mut self) {
        self.wake_counter = -1;
        self.finished = true;
    }

    /// Count down a sleeping thread.
    pub fn tick_sleep(&mut self, ms: i32) {
        if self.wake_counter > 0 {
            self.wake_counter = self.wake_counter.saturating_sub(ms).max(0);
        }
    }

    /// Bookkeeping after the thread has run in a pass.
    pub fn end_pass(&mut self, ms: i32) {
        self.advance_timers(ms);
        if self.wake_counter == -1 {
            self.wake_counter = 0;
        }
    }

    pub fn advance_timers(&mut self, ms: i32) {
        for index in SCM_TIMER_LOCALS {
            if let Ok(range) = self.local_slot(index) {
                let slot = &mut self.locals[range];
                let v = LittleEndian::read_i32(slot);
                LittleEndian::write_i32(slot, v.wrapping_add(ms));
            }
        }
    }

    pub fn death_or_arrest_check(&self) -> bool {
        self.death_or_arrest_check
    }

    pub fn set_death_or_arrest_check(&mut self, enabled: bool) {
        self.death_or_arrest_check = enabled;
    }

    /// Set once the thread has been unwound by [`abort_mission`](ScmThread::abort_mission).
    pub fn wasted_or_busted(&self) -> bool {
        self.wasted_or_busted
    }

    /// Return a mission thread to the address its outermost gosub would
    /// return to, dropping the rest of the call stack.
    ///
    /// Does nothing for non-mission threads or when the check is disabled.
    pub fn abort_mission(&mut self) -> bool {
        if !(self.is_mission && self.death_or_arrest_check) {
            return false;
        }
        self.wasted_or_busted = true;
        self.stack_depth = 0;
        self.program_counter = self.calls[0];
        true
    }

    pub fn allow_wait_skip(&self) -> bool {
        self.allow_wait_skip
    }

    pub fn set_allow_wait_skip(&mut self, allow: bool) {
        self.allow_wait_skip = allow;
    }

    /// Wake the thread now if its wait may be skipped. The permission is
    /// used up.
    pub fn skip_wait(&mut self) -> bool {
        if !self.allow_wait_skip {
            return false;
        }
        self.wake_counter = 0;
        self.allow_wait_skip = false;
        true
    }

    pub fn condition_result(&self) -> bool {
        self.condition_result
    }

    pub fn set_condition_result(&mut self, result: bool) {
        self.condition_result = result;
    }

    pub fn negate_condition(&mut self) {
        self.condition_result = !self.condition_result;
    }

    pub fn condition_count(&self) -> u32 {
        self.condition_count
    }

    pub fn condition_mask(&self) -> u8 {
        self.condition_mask
    }

    pub fn condition_and(&self) -> bool {
        self.condition_and
    }

    /// Open a condition group from the `If` operand.
    ///
    /// `0..=7` is an AND over `n + 1` checks; `21..` is an OR over `n - 19`.
    /// Anything in between opens an empty group.
    pub fn begin_condition(&mut self, n: i32) {
        if n <= 7 {
            self.condition_count = (n + 1).max(0) as u32;
            self.condition_mask = SCM_CONDITIONAL_MASK_PASSED;
            self.condition_and = true;
        } else {
            self.condition_count = (n - 19).max(0) as u32;
            self.condition_mask = 0;
            self.condition_and = false;
        }
    }

    /// Fold the current result into an open group.
    pub fn fold_condition(&mut self) {
        if self.condition_count == 0 {
            return;
        }
        self.condition_count -= 1;
        if self.condition_and {
            if !self.condition_result {
                self.condition_mask = 0;
            }
        } else {
            self.condition_mask = (self.condition_mask != 0 || self.condition_result) as u8;
        }
        self.condition_result = self.condition_mask != 0;
    }

    pub fn call_depth(&self) -> usize {
        self.stack_depth
    }

    pub fn calls(&self) -> &[ScmAddress] {
        &self.calls[..self.stack_depth]
    }

    pub fn push_call(&mut self, return_address: ScmAddress) -> ScriptResult<()> {
        if self.stack_depth >= SCM_STACK_DEPTH {
            return Err(ScriptError::CallStackOverflow {
                depth: self.stack_depth,
                thread: self.name.clone(),
            });
        }
        self.calls[self.stack_depth] = return_address;
        self.stack_depth += 1;
        Ok(())
    }

    pub fn pop_call(&mut self) -> ScriptResult<ScmAddress> {
        if self.stack_depth == 0 {
            return Err(ScriptError::CallStackUnderflow {
                thread: self.name.clone(),
            });
        }
        self.stack_depth -= 1;
        Ok(self.calls[self.stack_depth])
    }

    pub fn locals(&self) -> &[u8] {
        &self.locals
    }

    pub(crate) fn locals_are_valid(&self) -> bool {
        self.locals.len() == LOCALS_BYTES && self.stack_depth <= SCM_STACK_DEPTH
    }

    fn local_slot(&self, index: usize) -> ScriptResult<std::ops::Range<usize>> {
        if index >= SCM_THREAD_LOCAL_SIZE || (index + 1) * SCM_VARIABLE_SIZE > self.locals.len() {
            return Err(ScriptError::LocalOutOfBounds {
                index,
                size: SCM_THREAD_LOCAL_SIZE,
            });
        }
        let offset = index * SCM_VARIABLE_SIZE;
        Ok(offset..offset + SCM_VARIABLE_SIZE)
    }

    pub fn read_local_word(&self, index: usize) -> ScriptResult<[u8; SCM_VARIABLE_SIZE]> {
        let mut out = [0u8; SCM_VARIABLE_SIZE];
        out.copy_from_slice(&self.locals[self.local_slot(index)?]);
        Ok(out)
    }

    pub fn write_local_word(&mut self, index: usize, word: [u8; SCM_VARIABLE_SIZE]) -> ScriptResult<()> {
        let range = self.local_slot(index)?;
        self.locals[range].copy_from_slice(&word);
        Ok(())
    }

    pub fn read_local_i32(&self, index: usize) -> ScriptResult<i32> {
        Ok(i32::from_le_bytes(self.read_local_word(index)?))
    }

    pub fn write_local_i32(&mut self, index: usize, v: i32) -> ScriptResult<()> {
        self.write_local_word(index, v.to_le_bytes())
    }

    pub fn read_local_f32(&self, index: usize) -> ScriptResult<f32> {
        Ok(f32::from_le_bytes(self.read_local_word(index)?))
    }

    pub fn write_local_f32(&mut self, index: usize, v: f32) -> ScriptResult<()> {
        self.write_local_word(index, v.to_le_bytes())
    }
}
