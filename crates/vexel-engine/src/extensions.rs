//! Extension method registry
//!
//! Opaque numeric kernels (random, matmul, ...) live outside the engine.
//! The front end registers an implementation per extension opcode; matching
//! EXTENSION instructions are dispatched with the raw instruction as
//! payload and full access to the base arena.

use crate::error::{EngineError, Result};
use std::collections::HashMap;
use tracing::warn;
use vexel_core::{BaseArena, Instruction};

/// Registered implementation of one extension opcode
pub type ExtMethod = Box<dyn FnMut(&Instruction, &mut BaseArena) -> Result<()> + Send>;

#[derive(Default)]
pub struct ExtensionRegistry {
    methods: HashMap<u32, (String, ExtMethod)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` under `opcode`; re-registering replaces with a
    /// warning and returns the same id.
    pub fn register(&mut self, name: &str, opcode: u32, method: ExtMethod) -> u32 {
        if let Some((existing, _)) = self.methods.get(&opcode) {
            warn!(
                opcode,
                old = %existing,
                new = %name,
                "extension opcode registered more than once"
            );
        }
        self.methods.insert(opcode, (name.to_string(), method));
        opcode
    }

    pub fn is_registered(&self, opcode: u32) -> bool {
        self.methods.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Dispatch an EXTENSION instruction to its registered method.
    pub fn dispatch(
        &mut self,
        opcode: u32,
        instr: &Instruction,
        arena: &mut BaseArena,
    ) -> Result<()> {
        let (_, method) = self
            .methods
            .get_mut(&opcode)
            .ok_or(EngineError::UserFuncNotSupported(opcode))?;
        method(instr, arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_core::{Opcode, ScalarType, View};

    #[test]
    fn test_register_and_dispatch() {
        let mut registry = ExtensionRegistry::new();
        let mut arena = BaseArena::new();
        let out = arena.alloc(ScalarType::I64, 4);

        let id = registry.register(
            "iota",
            1000,
            Box::new(|instr, arena| {
                let view = instr.operands[0].clone();
                arena.write::<i64>(view.base, &[0, 1, 2, 3])?;
                Ok(())
            }),
        );
        assert_eq!(id, 1000);
        assert!(registry.is_registered(1000));

        let instr = Instruction::new(Opcode::Extension(1000), vec![View::contiguous(out, &[4])]);
        registry.dispatch(1000, &instr, &mut arena).unwrap();
        assert_eq!(arena.read::<i64>(out).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unregistered_opcode_fails() {
        let mut registry = ExtensionRegistry::new();
        let mut arena = BaseArena::new();
        let instr = Instruction::new(Opcode::Extension(7), vec![]);
        let err = registry.dispatch(7, &instr, &mut arena).unwrap_err();
        assert!(matches!(err, EngineError::UserFuncNotSupported(7)));
    }
}
