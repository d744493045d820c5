//! Symbol table: canonicalized operands behind dense handles
//!
//! Lowering interns every operand here. Identical `(base, shape, stride,
//! start)` views share one handle; every constant gets its own handle. The
//! table is pre-reserved to `6*N + 2` slots for an N-instruction batch
//! (one output plus up to two inputs per instruction, plus slack for bases
//! and axis constants); handle values are assignment-ordered and therefore
//! reproducible for a given batch, which block fingerprints rely on.

use crate::base::BaseHandle;
use crate::operand::{Const, Operand};
use crate::types::ScalarType;
use crate::view::View;
use std::collections::{HashMap, HashSet};
use std::ops::Index;

/// Table capacity for an `n`-instruction batch
pub const fn table_capacity(n: usize) -> usize {
    6 * n + 2
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    operands: Vec<Operand>,
    interned: HashMap<View, usize>,
    /// Writes per handle, parallel to `operands`
    writes: Vec<u32>,
    /// Reads per handle, parallel to `operands`
    reads: Vec<u32>,
    /// Handles whose first reference was a write
    born_written: HashSet<usize>,
    /// Bases freed somewhere in the batch
    freed: HashSet<BaseHandle>,
    /// Scalar-replacement candidates, filled by `count_tmp`
    temp: HashSet<usize>,
}

impl SymbolTable {
    /// Table for an `n`-instruction batch
    pub fn for_batch(n: usize) -> Self {
        let cap = table_capacity(n);
        Self {
            operands: Vec::with_capacity(cap),
            interned: HashMap::with_capacity(cap),
            writes: Vec::with_capacity(cap),
            reads: Vec::with_capacity(cap),
            born_written: HashSet::new(),
            freed: HashSet::new(),
            temp: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.operands.capacity()
    }

    fn push(&mut self, operand: Operand) -> usize {
        let handle = self.operands.len();
        self.operands.push(operand);
        self.writes.push(0);
        self.reads.push(0);
        handle
    }

    /// Intern an array view; identical descriptors share a handle
    pub fn intern_view(&mut self, view: &View, dtype: ScalarType) -> usize {
        if let Some(&handle) = self.interned.get(view) {
            return handle;
        }
        let handle = self.push(Operand::array(view.clone(), dtype));
        self.interned.insert(view.clone(), handle);
        handle
    }

    /// Intern a constant; constants are never shared
    pub fn intern_const(&mut self, value: Const, dtype: ScalarType) -> usize {
        self.push(Operand::immediate(value, dtype))
    }

    pub fn record_write(&mut self, handle: usize) {
        if self.writes[handle] == 0 && self.reads[handle] == 0 {
            self.born_written.insert(handle);
        }
        self.writes[handle] += 1;
    }

    pub fn record_read(&mut self, handle: usize) {
        self.reads[handle] += 1;
    }

    pub fn record_free(&mut self, base: BaseHandle) {
        self.freed.insert(base);
    }

    pub fn is_freed(&self, base: BaseHandle) -> bool {
        self.freed.contains(&base)
    }

    /// Mark scalar-replacement candidates: handles written exactly once,
    /// read at least once, whose first reference was the write and whose
    /// base does not outlive the batch.
    pub fn count_tmp(&mut self) {
        self.temp.clear();
        for handle in 0..self.operands.len() {
            let Operand::Array { view, .. } = &self.operands[handle] else {
                continue;
            };
            if self.writes[handle] == 1
                && self.reads[handle] >= 1
                && self.born_written.contains(&handle)
                && self.freed.contains(&view.base)
            {
                self.temp.insert(handle);
            }
        }
    }

    pub fn is_temp(&self, handle: usize) -> bool {
        self.temp.contains(&handle)
    }

    pub fn temp(&self) -> &HashSet<usize> {
        &self.temp
    }

    pub fn get(&self, handle: usize) -> &Operand {
        &self.operands[handle]
    }
}

impl Index<usize> for SymbolTable {
    type Output = Operand;

    fn index(&self, handle: usize) -> &Operand {
        &self.operands[handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseArena;

    #[test]
    fn test_capacity_invariant() {
        let table = SymbolTable::for_batch(10);
        assert!(table.capacity() >= table_capacity(10));
        assert_eq!(table_capacity(10), 62);
    }

    #[test]
    fn test_view_canonicalization() {
        let mut arena = BaseArena::new();
        let b = arena.alloc(ScalarType::F64, 16);

        let mut table = SymbolTable::for_batch(2);
        let v = View::contiguous(b, &[16]);
        let h1 = table.intern_view(&v, ScalarType::F64);
        let h2 = table.intern_view(&v.clone(), ScalarType::F64);
        assert_eq!(h1, h2);

        let mut shifted = v.clone();
        shifted.start = 4;
        shifted.shape = vec![4];
        let h3 = table.intern_view(&shifted, ScalarType::F64);
        assert_ne!(h1, h3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_constants_not_shared() {
        let mut table = SymbolTable::for_batch(2);
        let c1 = table.intern_const(Const::F64(1.0), ScalarType::F64);
        let c2 = table.intern_const(Const::F64(1.0), ScalarType::F64);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_count_tmp() {
        let mut arena = BaseArena::new();
        let t = arena.alloc(ScalarType::F64, 8);
        let u = arena.alloc(ScalarType::F64, 8);
        let w = arena.alloc(ScalarType::F64, 8);

        let mut table = SymbolTable::for_batch(4);
        let ht = table.intern_view(&View::contiguous(t, &[8]), ScalarType::F64);
        let hu = table.intern_view(&View::contiguous(u, &[8]), ScalarType::F64);
        let hw = table.intern_view(&View::contiguous(w, &[8]), ScalarType::F64);

        // t: written once, read once, freed in batch -> temp
        table.record_write(ht);
        table.record_read(ht);
        table.record_free(t);

        // u: read before any write (enters the batch live) -> not temp
        table.record_read(hu);
        table.record_write(hu);
        table.record_free(u);

        // w: written once, read once, but survives the batch -> not temp
        table.record_write(hw);
        table.record_read(hw);

        table.count_tmp();
        assert!(table.is_temp(ht));
        assert!(!table.is_temp(hu));
        assert!(!table.is_temp(hw));
    }
}
