//! Kernel plans and the launcher ABI
//!
//! A `KernelPlan` is the structural description of one block after range
//! analysis and scalar replacement: operand descriptors in local order plus
//! the per-range step lists. The specializer renders C from a plan and the
//! fallback interpreter executes a plan directly, so both paths share one
//! definition of what a kernel does.
//!
//! The launcher ABI passes one `KernelOperand` per local operand: a raw
//! descriptor the generated C casts to `vx_operand`. Shape and stride
//! pointers borrow from the symbol table for the duration of one launch.

use crate::error::Result;
use std::sync::Arc;
use vexel_core::{Layout, ScalarType, TacOp, TacSub};

/// C-ABI operand descriptor handed to launchers
///
/// `data` is null for immediates and scalar-replaced temps; immediates
/// carry their value in `imm_f`/`imm_i` instead.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KernelOperand {
    pub data: *mut u8,
    pub nelem: i64,
    pub start: i64,
    pub ndim: i64,
    pub shape: *const i64,
    pub stride: *const i64,
    pub imm_f: f64,
    pub imm_i: i64,
}

impl KernelOperand {
    pub fn null() -> Self {
        Self {
            data: std::ptr::null_mut(),
            nelem: 0,
            start: 0,
            ndim: 0,
            shape: std::ptr::null(),
            stride: std::ptr::null(),
            imm_f: 0.0,
            imm_i: 0,
        }
    }
}

/// Callable kernel: a loaded shared-object trampoline or an interpreter
/// closure, invoked with one descriptor per local operand.
pub type Launcher = Arc<dyn Fn(&mut [KernelOperand]) -> Result<()> + Send + Sync>;

/// One local operand of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOperand {
    pub dtype: ScalarType,
    pub layout: Layout,
    pub ndim: usize,
    pub scalar_replaced: bool,
    pub immediate: bool,
}

/// One executable step (SYSTEM/NOOP members never appear in plans)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub op: TacOp,
    pub sub: TacSub,
    pub out: usize,
    pub in1: Option<usize>,
    pub in2: Option<usize>,
}

/// One fuse range: a run of MAP/ZIP sharing a loop, or a lone
/// GENERATE/REDUCE/SCAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRange {
    pub layout: Layout,
    pub steps: Vec<PlanStep>,
}

/// Structural description of one kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPlan {
    pub operands: Vec<PlanOperand>,
    pub ranges: Vec<PlanRange>,
}

impl KernelPlan {
    /// Assemble a plan from an analyzed block.
    pub fn build(
        block: &crate::block::Block,
        ranges: &[crate::fuser::FuseRange],
        program: &[vexel_core::Tac],
        table: &vexel_core::SymbolTable,
    ) -> Self {
        let operands = block
            .operands()
            .iter()
            .enumerate()
            .map(|(local, &handle)| {
                let operand = &table[handle];
                PlanOperand {
                    dtype: operand.dtype(),
                    layout: operand.layout(),
                    ndim: operand.ndim(),
                    scalar_replaced: block.is_scalar_replaced(local),
                    immediate: operand.is_immediate(),
                }
            })
            .collect();

        let plan_ranges = ranges
            .iter()
            .map(|range| {
                let steps = (range.begin..=range.end)
                    .filter_map(|pos| {
                        let tac = block.tac(pos, program);
                        if matches!(tac.op, TacOp::System | TacOp::Noop) {
                            return None;
                        }
                        Some(PlanStep {
                            op: tac.op,
                            sub: tac.sub,
                            out: block.local(tac.out),
                            in1: tac.input1().map(|h| block.local(h)),
                            in2: tac.input2().map(|h| block.local(h)),
                        })
                    })
                    .collect();
                PlanRange {
                    layout: range.layout,
                    steps,
                }
            })
            .filter(|r: &PlanRange| !r.steps.is_empty())
            .collect();

        Self {
            operands,
            ranges: plan_ranges,
        }
    }

    /// Local index of the operand a range's loop is shaped by: the first
    /// step's output.
    pub fn range_iteration_operand(&self, range: &PlanRange) -> usize {
        range.steps[0].out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::fuser;
    use vexel_core::{
        instrs_to_tacs, BaseArena, Instruction, Opcode, ScalarType, SymbolTable, View,
    };

    #[test]
    fn test_plan_skips_system_steps() {
        let mut arena = BaseArena::new();
        let a = arena.alloc(ScalarType::F64, 8);
        let b = arena.alloc(ScalarType::F64, 8);
        let c = arena.alloc(ScalarType::F64, 8);
        let va = View::contiguous(a, &[8]);
        let vb = View::contiguous(b, &[8]);
        let vc = View::contiguous(c, &[8]);

        let batch = vec![
            Instruction::new(Opcode::Add, vec![vc, va.clone(), vb.clone()]),
            Instruction::new(Opcode::Free, vec![va]),
        ];
        let mut table = SymbolTable::for_batch(batch.len());
        let mut program = Vec::new();
        instrs_to_tacs(&arena, &batch, &mut program, &mut table).unwrap();

        let mut block = Block::new();
        block.compose(&[0, 1], &program);
        let ranges = fuser::fuse_ranges(&block, &program, &table);
        let plan = KernelPlan::build(&block, &ranges, &program, &table);

        assert_eq!(plan.ranges.len(), 1);
        assert_eq!(plan.ranges[0].steps.len(), 1);
        assert_eq!(plan.ranges[0].steps[0].sub, vexel_core::TacSub::Add);
        assert_eq!(plan.operands.len(), 3);
    }
}
