//! Front-end instruction batches
//!
//! The engine receives batches of array instructions from an upstream IR
//! producer. Each instruction is an opcode over views of base arrays, plus
//! an optional immediate constant (fill value, reduction axis). Opcodes the
//! producer registered at runtime arrive as `Extension` and are dispatched
//! to the registered method with the raw instruction as payload.

use crate::operand::Const;
use crate::view::View;

/// Front-end opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // System
    None,
    Sync,
    Discard,
    Free,
    // Elementwise unary
    Identity,
    Negative,
    Absolute,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    LogicalNot,
    // Elementwise binary
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Power,
    Minimum,
    Maximum,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    // Generators
    Fill,
    Range,
    // Reductions
    AddReduce,
    MulReduce,
    MinReduce,
    MaxReduce,
    // Prefix scans
    AddScan,
    MulScan,
    /// Runtime-registered opcode
    Extension(u32),
}

impl Opcode {
    /// Number of view operands (output first)
    pub fn noperands(self) -> usize {
        match self {
            Opcode::None => 0,
            Opcode::Sync | Opcode::Discard | Opcode::Free => 1,
            Opcode::Fill | Opcode::Range => 1,
            Opcode::Identity
            | Opcode::Negative
            | Opcode::Absolute
            | Opcode::Exp
            | Opcode::Log
            | Opcode::Sqrt
            | Opcode::Sin
            | Opcode::Cos
            | Opcode::Tanh
            | Opcode::LogicalNot => 2,
            Opcode::AddReduce
            | Opcode::MulReduce
            | Opcode::MinReduce
            | Opcode::MaxReduce
            | Opcode::AddScan
            | Opcode::MulScan => 2,
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Mod
            | Opcode::Power
            | Opcode::Minimum
            | Opcode::Maximum
            | Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor => 3,
            // Extensions carry whatever the registered method expects
            Opcode::Extension(_) => 0,
        }
    }

    pub fn is_system(self) -> bool {
        matches!(self, Opcode::None | Opcode::Sync | Opcode::Discard | Opcode::Free)
    }
}

/// One instruction of a batch
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Output view first, inputs after
    pub operands: Vec<View>,
    /// Fill value or reduction/scan axis
    pub constant: Option<Const>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<View>) -> Self {
        Self {
            opcode,
            operands,
            constant: None,
        }
    }

    pub fn with_constant(opcode: Opcode, operands: Vec<View>, constant: Const) -> Self {
        Self {
            opcode,
            operands,
            constant: Some(constant),
        }
    }

    pub fn out(&self) -> Option<&View> {
        self.operands.first()
    }
}

/// A batch is the unit of submission: executed to completion, in order
pub type Batch = [Instruction];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseHandle;

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::None.noperands(), 0);
        assert_eq!(Opcode::Free.noperands(), 1);
        assert_eq!(Opcode::Exp.noperands(), 2);
        assert_eq!(Opcode::Add.noperands(), 3);
        assert_eq!(Opcode::AddReduce.noperands(), 2);
    }

    #[test]
    fn test_system_class() {
        assert!(Opcode::Sync.is_system());
        assert!(!Opcode::Add.is_system());
        assert!(!Opcode::Extension(17).is_system());
    }

    #[test]
    fn test_instruction_out() {
        let v = View::contiguous(BaseHandle::new(0), &[4]);
        let instr = Instruction::new(Opcode::Free, vec![v.clone()]);
        assert!(instr.out().unwrap().aligned(&v));
    }
}
