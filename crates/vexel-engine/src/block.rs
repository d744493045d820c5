//! Blocks: ordered TAC sets with a structural fingerprint
//!
//! A block is composed from a subgraph (members in program order) or from a
//! single TAC, and carries the local operand table for the kernel that will
//! execute it: global symbol handles are renumbered densely in first-use
//! order. The fingerprint is rendered from local numbering only, so two
//! structurally identical blocks from different batches produce the same
//! symbol and share one compiled kernel.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use vexel_core::{SymbolTable, Tac, View};

/// Ordered TAC set plus its local operand table
#[derive(Debug, Default)]
pub struct Block {
    /// Global TAC indices, program order
    tacs: Vec<usize>,
    /// Global handle -> local operand index
    local_of: HashMap<usize, usize>,
    /// Local operand index -> global handle
    operands: Vec<usize>,
    /// Local operand indices elected for scalar replacement
    scalar_replaced: HashSet<usize>,
    /// Structural fingerprint, valid after `symbolize`
    symbol: String,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.tacs.clear();
        self.local_of.clear();
        self.operands.clear();
        self.scalar_replaced.clear();
        self.symbol.clear();
    }

    /// Compose from subgraph members (already in program order)
    pub fn compose(&mut self, vertices: &[usize], program: &[Tac]) {
        self.clear();
        self.tacs.extend_from_slice(vertices);
        for &idx in vertices {
            for handle in program[idx].operands() {
                self.intern_local(handle);
            }
        }
    }

    /// Compose from a single TAC
    pub fn compose_single(&mut self, idx: usize, program: &[Tac]) {
        self.compose(&[idx], program);
    }

    fn intern_local(&mut self, handle: usize) -> usize {
        if let Some(&local) = self.local_of.get(&handle) {
            return local;
        }
        let local = self.operands.len();
        self.operands.push(handle);
        self.local_of.insert(handle, local);
        local
    }

    pub fn ntacs(&self) -> usize {
        self.tacs.len()
    }

    pub fn tacs(&self) -> &[usize] {
        &self.tacs
    }

    pub fn tac<'p>(&self, pos: usize, program: &'p [Tac]) -> &'p Tac {
        &program[self.tacs[pos]]
    }

    pub fn noperands(&self) -> usize {
        self.operands.len()
    }

    /// Local operand index -> global handle, dense first-use order
    pub fn operands(&self) -> &[usize] {
        &self.operands
    }

    pub fn local(&self, handle: usize) -> usize {
        self.local_of[&handle]
    }

    pub fn mark_scalar_replaced(&mut self, local: usize) {
        self.scalar_replaced.insert(local);
    }

    pub fn is_scalar_replaced(&self, local: usize) -> bool {
        self.scalar_replaced.contains(&local)
    }

    pub fn scalar_replaced(&self) -> &HashSet<usize> {
        &self.scalar_replaced
    }

    /// Output view of the first array-op TAC: the iteration space the
    /// kernel nest is shaped by.
    pub fn dominant_view<'t>(&self, program: &[Tac], table: &'t SymbolTable) -> Option<&'t View> {
        for &idx in &self.tacs {
            let tac = &program[idx];
            if tac.op.is_array_op() {
                if let Some(out) = tac.output() {
                    if let Some(view) = table[out].view() {
                        return Some(view);
                    }
                }
            }
        }
        None
    }

    pub fn rank(&self, program: &[Tac], table: &SymbolTable) -> usize {
        self.dominant_view(program, table).map_or(0, View::ndim)
    }

    pub fn size(&self, program: &[Tac], table: &SymbolTable) -> usize {
        self.dominant_view(program, table).map_or(0, View::nelem)
    }

    /// A block whose array operands are all dense may be re-nested to a
    /// compatible partner's extent during block-level fusion.
    pub fn is_reshapable(&self, table: &SymbolTable) -> bool {
        self.operands.iter().all(|&handle| {
            table[handle]
                .view()
                .map_or(true, |view| view.is_contiguous())
        })
    }

    /// Recompute the structural fingerprint.
    ///
    /// Operand section: dtype, layout, rank and scalar-replacement mark per
    /// local operand. TAC section: op, sub and local operand indices per
    /// member. Global handle values never appear, and the alphabet is
    /// restricted to `[A-Za-z0-9_x]` because the symbol doubles as the
    /// on-disk kernel file stem.
    pub fn symbolize(&mut self, program: &[Tac], table: &SymbolTable) -> &str {
        let mut fp = String::with_capacity(12 * (self.operands.len() + self.tacs.len()));

        for (local, &handle) in self.operands.iter().enumerate() {
            if local > 0 {
                fp.push('_');
            }
            let operand = &table[handle];
            let _ = write!(
                fp,
                "{}{}{}",
                operand.dtype(),
                operand.layout(),
                operand.ndim()
            );
            if self.scalar_replaced.contains(&local) {
                fp.push('r');
            }
        }
        fp.push_str("__");
        for (pos, &idx) in self.tacs.iter().enumerate() {
            if pos > 0 {
                fp.push('_');
            }
            let tac = &program[idx];
            let _ = write!(fp, "{}{}", tac.op, tac.sub);
            for handle in tac.operands() {
                let _ = write!(fp, "x{}", self.local_of[&handle]);
            }
        }

        self.symbol = fp;
        &self.symbol
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_core::{
        instrs_to_tacs, BaseArena, Instruction, Opcode, ScalarType, SymbolTable, View,
    };

    fn lower(arena: &BaseArena, batch: &[Instruction]) -> (SymbolTable, Vec<Tac>) {
        let mut table = SymbolTable::for_batch(batch.len());
        let mut program = Vec::new();
        instrs_to_tacs(arena, batch, &mut program, &mut table).unwrap();
        (table, program)
    }

    fn zip_batch(arena: &mut BaseArena, nelem: i64) -> Vec<Instruction> {
        let a = arena.alloc(ScalarType::F64, nelem as usize);
        let b = arena.alloc(ScalarType::F64, nelem as usize);
        let c = arena.alloc(ScalarType::F64, nelem as usize);
        vec![Instruction::new(
            Opcode::Add,
            vec![
                View::contiguous(c, &[nelem]),
                View::contiguous(a, &[nelem]),
                View::contiguous(b, &[nelem]),
            ],
        )]
    }

    #[test]
    fn test_local_renumbering() {
        let mut arena = BaseArena::new();
        let batch = zip_batch(&mut arena, 8);
        let (_table, program) = lower(&arena, &batch);

        let mut block = Block::new();
        block.compose_single(0, &program);

        // out, in1, in2 in first-use order
        assert_eq!(block.noperands(), 3);
        assert_eq!(block.local(program[0].out), 0);
        assert_eq!(block.local(program[0].in1), 1);
        assert_eq!(block.local(program[0].in2), 2);
    }

    #[test]
    fn test_fingerprint_stable_under_handle_renaming() {
        // Same structure built twice; the second arena has extra bases so
        // every global handle differs.
        let mut arena1 = BaseArena::new();
        let batch1 = zip_batch(&mut arena1, 16);
        let (table1, program1) = lower(&arena1, &batch1);

        let mut arena2 = BaseArena::new();
        for _ in 0..5 {
            arena2.alloc(ScalarType::I8, 1);
        }
        let batch2 = zip_batch(&mut arena2, 16);
        let (table2, program2) = lower(&arena2, &batch2);

        let mut b1 = Block::new();
        b1.compose_single(0, &program1);
        let mut b2 = Block::new();
        b2.compose_single(0, &program2);

        assert_eq!(
            b1.symbolize(&program1, &table1),
            b2.symbolize(&program2, &table2)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_structure() {
        let mut arena = BaseArena::new();
        let batch = zip_batch(&mut arena, 8);
        let (table, program) = lower(&arena, &batch);

        let mut base = Block::new();
        base.compose_single(0, &program);
        let reference = base.symbolize(&program, &table).to_string();

        // Different dtype
        let mut arena_f32 = BaseArena::new();
        let a = arena_f32.alloc(ScalarType::F32, 8);
        let b = arena_f32.alloc(ScalarType::F32, 8);
        let c = arena_f32.alloc(ScalarType::F32, 8);
        let batch_f32 = vec![Instruction::new(
            Opcode::Add,
            vec![
                View::contiguous(c, &[8]),
                View::contiguous(a, &[8]),
                View::contiguous(b, &[8]),
            ],
        )];
        let (t2, p2) = lower(&arena_f32, &batch_f32);
        let mut other = Block::new();
        other.compose_single(0, &p2);
        assert_ne!(other.symbolize(&p2, &t2), reference);

        // Different sub-operation
        let mut arena_mul = BaseArena::new();
        let batch_mul = {
            let a = arena_mul.alloc(ScalarType::F64, 8);
            let b = arena_mul.alloc(ScalarType::F64, 8);
            let c = arena_mul.alloc(ScalarType::F64, 8);
            vec![Instruction::new(
                Opcode::Multiply,
                vec![
                    View::contiguous(c, &[8]),
                    View::contiguous(a, &[8]),
                    View::contiguous(b, &[8]),
                ],
            )]
        };
        let (t3, p3) = lower(&arena_mul, &batch_mul);
        let mut mul = Block::new();
        mul.compose_single(0, &p3);
        assert_ne!(mul.symbolize(&p3, &t3), reference);
    }

    #[test]
    fn test_fingerprint_sensitive_to_scalar_replacement() {
        let mut arena = BaseArena::new();
        let batch = zip_batch(&mut arena, 8);
        let (table, program) = lower(&arena, &batch);

        let mut plain = Block::new();
        plain.compose_single(0, &program);
        let without = plain.symbolize(&program, &table).to_string();

        let mut marked = Block::new();
        marked.compose_single(0, &program);
        marked.mark_scalar_replaced(0);
        assert_ne!(marked.symbolize(&program, &table), without);
    }

    #[test]
    fn test_fingerprint_insensitive_to_shape_extent() {
        // Same rank and layout, different extent: same kernel
        let mut arena1 = BaseArena::new();
        let batch1 = zip_batch(&mut arena1, 8);
        let (t1, p1) = lower(&arena1, &batch1);

        let mut arena2 = BaseArena::new();
        let batch2 = zip_batch(&mut arena2, 4096);
        let (t2, p2) = lower(&arena2, &batch2);

        let mut b1 = Block::new();
        b1.compose_single(0, &p1);
        let mut b2 = Block::new();
        b2.compose_single(0, &p2);
        assert_eq!(b1.symbolize(&p1, &t1), b2.symbolize(&p2, &t2));
    }

    #[test]
    fn test_dominant_view_and_rank() {
        let mut arena = BaseArena::new();
        let a = arena.alloc(ScalarType::F64, 24);
        let b = arena.alloc(ScalarType::F64, 24);
        let batch = vec![Instruction::new(
            Opcode::Exp,
            vec![View::contiguous(b, &[4, 6]), View::contiguous(a, &[4, 6])],
        )];
        let (table, program) = lower(&arena, &batch);

        let mut block = Block::new();
        block.compose_single(0, &program);
        assert_eq!(block.rank(&program, &table), 2);
        assert_eq!(block.size(&program, &table), 24);
        assert!(block.is_reshapable(&table));
    }
}
