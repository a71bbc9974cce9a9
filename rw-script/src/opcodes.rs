use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::error::ScriptResult;
use crate::machine::ScriptArguments;
use crate::modules::game::ScriptHost;
use crate::types::ScmOpcode;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u8 {
        /// Produces a boolean that feeds the condition accumulator.
        const CONDITIONAL = 1 << 0;
        /// Starts a condition group and is excluded from its own fold.
        const OPENS_CONDITION = 1 << 1;
    }
}

/// How many operands an opcode consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// At least this many, then more until an end-of-list marker.
    Variable(usize),
}

impl Arity {
    /// Negative counts mark variadic opcodes.
    pub fn from_count(count: i32) -> Self {
        if count < 0 {
            Arity::Variable(count.unsigned_abs() as usize)
        } else {
            Arity::Fixed(count as usize)
        }
    }

    pub fn required(self) -> usize {
        match self {
            Arity::Fixed(n) | Arity::Variable(n) => n,
        }
    }

    pub fn is_variable(self) -> bool {
        matches!(self, Arity::Variable(_))
    }
}

pub type ActionFn<C> = fn(&mut ScriptArguments<'_, C>) -> ScriptResult<()>;
pub type ConditionFn<C> = fn(&mut ScriptArguments<'_, C>) -> ScriptResult<bool>;

pub enum ScriptFunction<C> {
    Action(ActionFn<C>),
    /// The returned bool becomes the thread's condition result.
    Condition(ConditionFn<C>),
}

impl<C> Clone for ScriptFunction<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ScriptFunction<C> {}

impl<C> fmt::Debug for ScriptFunction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFunction::Action(_) => f.write_str("Action"),
            ScriptFunction::Condition(_) => f.write_str("Condition"),
        }
    }
}

/// Registry entry for one opcode.
pub struct ScriptFunctionMeta<C> {
    /// `None` decodes operands and does nothing else.
    pub function: Option<ScriptFunction<C>>,
    pub arity: Arity,
    pub flags: OpcodeFlags,
    pub signature: &'static str,
    pub description: &'static str,
}

impl<C> Clone for ScriptFunctionMeta<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ScriptFunctionMeta<C> {}

impl<C> fmt::Debug for ScriptFunctionMeta<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunctionMeta")
            .field("function", &self.function)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .field("signature", &self.signature)
            .field("description", &self.description)
            .finish()
    }
}

impl<C> ScriptFunctionMeta<C> {
    pub fn action(f: ActionFn<C>, args: i32, signature: &'static str, description: &'static str) -> Self {
        Self {
            function: Some(ScriptFunction::Action(f)),
            arity: Arity::from_count(args),
            flags: OpcodeFlags::empty(),
            signature,
            description,
        }
    }

    pub fn condition(
        f: ConditionFn<C>,
        args: i32,
        signature: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            function: Some(ScriptFunction::Condition(f)),
            arity: Arity::from_count(args),
            flags: OpcodeFlags::CONDITIONAL,
            signature,
            description,
        }
    }

    pub fn unimplemented(args: i32, signature: &'static str, description: &'static str) -> Self {
        Self {
            function: None,
            arity: Arity::from_count(args),
            flags: OpcodeFlags::empty(),
            signature,
            description,
        }
    }

    pub fn with_flags(mut self, flags: OpcodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.flags.contains(OpcodeFlags::CONDITIONAL)
    }

    pub fn opens_condition(&self) -> bool {
        self.flags.contains(OpcodeFlags::OPENS_CONDITION)
    }
}

/// A named group of opcode bindings.
pub struct ScriptModule<C> {
    name: String,
    functions: BTreeMap<ScmOpcode, ScriptFunctionMeta<C>>,
}

impl<C> ScriptModule<C> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rebinding an id replaces the earlier entry.
    pub fn bind(&mut self, id: ScmOpcode, meta: ScriptFunctionMeta<C>) -> &mut Self {
        if self.functions.insert(id, meta).is_some() {
            log::warn!("{}: opcode {:04x} bound twice", self.name, id);
        }
        self
    }

    pub fn bind_action(
        &mut self,
        id: ScmOpcode,
        f: ActionFn<C>,
        args: i32,
        signature: &'static str,
        description: &'static str,
    ) -> &mut Self {
        self.bind(id, ScriptFunctionMeta::action(f, args, signature, description))
    }

    pub fn bind_condition(
        &mut self,
        id: ScmOpcode,
        f: ConditionFn<C>,
        args: i32,
        signature: &'static str,
        description: &'static str,
    ) -> &mut Self {
        self.bind(id, ScriptFunctionMeta::condition(f, args, signature, description))
    }

    pub fn bind_unimplemented(
        &mut self,
        id: ScmOpcode,
        args: i32,
        signature: &'static str,
        description: &'static str,
    ) -> &mut Self {
        self.bind(id, ScriptFunctionMeta::unimplemented(args, signature, description))
    }

    pub fn find_opcode(&self, id: ScmOpcode) -> Option<&ScriptFunctionMeta<C>> {
        self.functions.get(&id)
    }

    pub fn functions(&self) -> impl Iterator<Item = (ScmOpcode, &ScriptFunctionMeta<C>)> {
        self.functions.iter().map(|(id, meta)| (*id, meta))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Opcode registry: modules searched in insertion order.
pub struct ScmOpcodes<C> {
    modules: Vec<ScriptModule<C>>,
}

impl<C> Default for ScmOpcodes<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ScmOpcodes<C> {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn with_module(mut self, module: ScriptModule<C>) -> Self {
        self.add_module(module);
        self
    }

    pub fn add_module(&mut self, module: ScriptModule<C>) {
        log::debug!("registering script module {} ({} opcodes)", module.name(), module.len());
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[ScriptModule<C>] {
        &self.modules
    }

    /// First module that binds `id` wins.
    pub fn find_opcode(&self, id: ScmOpcode) -> Option<&ScriptFunctionMeta<C>> {
        self.modules.iter().find_map(|m| m.find_opcode(id))
    }
}

impl<C: ScriptHost> ScmOpcodes<C> {
    /// Registry with the VM control-flow module and the game module.
    pub fn standard() -> Self {
        Self::new()
            .with_module(crate::modules::vm_module())
            .with_module(crate::modules::game_module())
    }
}
